//! Collection dumper

use std::io::Write;

use codevec_core::Result;
use codevec_vector::VectorStore;
use tracing::debug;

use crate::render::write_record;

/// Print every record in the store's collection. Returns the number printed.
///
/// Fails with `CollectionNotFound` when the collection does not exist.
pub async fn dump_collection(
    store: &dyn VectorStore,
    page_size: usize,
    out: &mut dyn Write,
) -> Result<usize> {
    store.heartbeat().await?;
    writeln!(out, "Successfully connected to the vector database")?;

    let collection = store.get_collection().await?;
    writeln!(out, "Successfully retrieved collection: '{}'", collection.name)?;

    let records = store.get_all(page_size, true).await?;
    debug!(collection = %collection.name, count = records.len(), "Fetched records");

    if records.is_empty() {
        writeln!(out, "No chunks found in the collection '{}'.", collection.name)?;
        return Ok(0);
    }

    writeln!(
        out,
        "\n--- Chunks in Collection '{}' ({} total) ---",
        collection.name,
        records.len()
    )?;
    for record in &records {
        write_record(out, record)?;
    }

    Ok(records.len())
}
