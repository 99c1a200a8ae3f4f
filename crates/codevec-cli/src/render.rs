//! Console formatting shared by the commands

use std::io::{self, Write};

use codevec_core::{CodevecError, Metadata};
use codevec_vector::{QueryHit, StoredRecord};

/// Rule printed between dumped records
pub const RECORD_SEPARATOR: &str = "------------------------------";

/// Human label for a metadata key: `import_pkg` becomes `Import Pkg`
pub fn field_label(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Metadata value as display text, `N/A` when the key is absent
pub fn field_value(metadata: &Metadata, key: &str) -> String {
    metadata
        .get(key)
        .map(ToString::to_string)
        .unwrap_or_else(|| "N/A".to_string())
}

/// Print one ranked query hit
pub fn write_hit(
    out: &mut dyn Write,
    rank: usize,
    hit: &QueryHit,
    display_fields: &[String],
) -> io::Result<()> {
    writeln!(out, "\n  Result {rank} (Distance: {:.4}):", hit.distance)?;
    for key in display_fields {
        writeln!(
            out,
            "    {}: {}",
            field_label(key),
            field_value(&hit.metadata, key)
        )?;
    }
    writeln!(out, "    --- Code Snippet ---")?;
    writeln!(out, "{}", hit.document.as_deref().unwrap_or(""))?;
    writeln!(out, "    --------------------")
}

/// Print one stored record as id and content
pub fn write_record(out: &mut dyn Write, record: &StoredRecord) -> io::Result<()> {
    writeln!(out, "Chunk ID: {}", record.id)?;
    writeln!(out, "  Content:")?;
    writeln!(out, "{}", record.document.as_deref().unwrap_or(""))?;
    writeln!(out, "{RECORD_SEPARATOR}")
}

/// Print an aborted command's error, the server for connection failures,
/// and the remediation hint when there is one
pub fn write_error(out: &mut dyn Write, err: &anyhow::Error, server_url: &str) -> io::Result<()> {
    writeln!(out, "Error: {err:#}")?;

    let Some(err) = err.downcast_ref::<CodevecError>() else {
        return Ok(());
    };
    if matches!(err, CodevecError::ConnectionError(_)) {
        writeln!(out, "Server: {server_url}")?;
    }
    if let Some(hint) = err.hint() {
        writeln!(out, "{hint}")?;
    }
    Ok(())
}
