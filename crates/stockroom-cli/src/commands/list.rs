use std::path::Path;

use chrono::Utc;

use crate::commands::common::{
    format_pending_lines, format_product_lines, pending_to_list_item, product_to_list_item,
    PendingListItem, ProductListItem, Session,
};
use crate::error::CliError;

pub async fn run_list(pending_only: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let session = Session::open(db_path).await?;
    let now = Utc::now();

    if pending_only {
        let queue = session.engine.pending();
        if as_json {
            let json_items = queue
                .iter()
                .map(pending_to_list_item)
                .collect::<Vec<PendingListItem>>();
            println!("{}", serde_json::to_string_pretty(&json_items)?);
        } else if queue.is_empty() {
            println!("No pending products.");
        } else {
            for line in format_pending_lines(&queue, now) {
                println!("{line}");
            }
        }
        return Ok(());
    }

    // Listing stays offline; pending entries are pushed by `add` and `sync`.
    session.load_remote().await;

    let products = session.engine.products();
    if as_json {
        let json_items = products
            .iter()
            .map(|entry| product_to_list_item(entry, now))
            .collect::<Vec<ProductListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if products.is_empty() {
        println!("No products yet.");
    } else {
        for line in format_product_lines(&products, now) {
            println!("{line}");
        }
    }
    Ok(())
}
