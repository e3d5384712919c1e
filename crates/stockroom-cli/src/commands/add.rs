use std::path::{Path, PathBuf};

use stockroom_core::models::{ImagePayload, ImageSource};
use stockroom_core::ProductInput;

use crate::commands::common::{content_type_for, format_outcome, Session};
use crate::error::CliError;

pub struct AddArgs {
    pub name: String,
    pub cost: f64,
    pub selling: f64,
    pub company: Option<String>,
    pub discount: Option<f64>,
    pub image: Option<PathBuf>,
    pub offline: bool,
}

pub async fn run_add(args: AddArgs, db_path: &Path) -> Result<(), CliError> {
    let offline = args.offline;
    let input = build_input(args)?;

    let session = Session::open(db_path).await?;
    let pending = session.engine.add_product(input)?;
    println!("{}", pending.temp_id);

    if offline || !session.connect().await {
        session.engine.flush().await;
        println!("Saved locally, will sync later");
        return Ok(());
    }

    let run = session.sync().await;
    println!("{}", format_outcome(&run));
    Ok(())
}

pub fn build_input(args: AddArgs) -> Result<ProductInput, CliError> {
    let mut input = ProductInput::new(args.name, args.cost, args.selling);
    if let Some(company) = args.company {
        input = input.with_company(company);
    }
    if let Some(discount) = args.discount {
        input = input.with_max_discount(discount);
    }
    if let Some(path) = args.image {
        input = input.with_image(image_payload(path)?);
    }
    Ok(input)
}

fn image_payload(path: PathBuf) -> Result<ImagePayload, CliError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| CliError::InvalidImagePath(path.display().to_string()))?;
    Ok(ImagePayload {
        file_name,
        content_type: content_type_for(&path),
        source: ImageSource::Path(path),
    })
}
