//! HEX file info command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    ispflash::MemoryImage,
    std::path::Path,
};

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let image = load(firmware)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(firmware, &image))?
        );
        return Ok(());
    }

    eprintln!(
        "{} Loaded {}",
        style("📦").cyan(),
        style(firmware.display()).bold()
    );
    eprintln!("\n{}", style("Image").bold().underlined());
    eprintln!("  Size:         {} bytes", image.len());
    eprintln!("  Records:      {}", image.record_count());
    eprintln!("  Data records: {}", image.data_record_count());

    eprintln!("\n{}", style("Segments").bold().underlined());
    for (i, segment) in image.segments().iter().enumerate() {
        eprintln!(
            "  [{i:2}] {} @ 0x{:08X} ({} bytes)",
            style("•").dim(),
            segment.address,
            segment.data.len()
        );
    }
    if image.is_empty() {
        eprintln!("  {}", style("(no data records)").yellow());
    }

    Ok(())
}

fn load(firmware: &Path) -> Result<MemoryImage> {
    MemoryImage::from_file(firmware)
        .with_context(|| format!("failed to load firmware {}", firmware.display()))
}

/// Structured form of the image summary.
fn info_json(firmware: &Path, image: &MemoryImage) -> serde_json::Value {
    let segments: Vec<serde_json::Value> = image
        .segments()
        .iter()
        .map(|segment| {
            serde_json::json!({
                "address": segment.address,
                "length": segment.data.len(),
            })
        })
        .collect();

    serde_json::json!({
        "path": firmware.display().to_string(),
        "size": image.len(),
        "record_count": image.record_count(),
        "data_record_count": image.data_record_count(),
        "segments": segments,
    })
}
