//! `tilepress inspect`: summarise a container file.

use std::path::PathBuf;

use clap::Args;
use tilepress::container::{inspect, ContainerError, Inspection};

use crate::error::CliError;

/// Arguments for `tilepress inspect`.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Container file to read
    pub path: PathBuf,

    /// List every tile-part
    #[arg(long)]
    pub tiles: bool,
}

/// Run the inspect command.
pub fn run(args: InspectArgs) -> Result<(), CliError> {
    let inspection = inspect(&args.path)?;
    print!("{}", report(&inspection, args.tiles));

    if !inspection.tlm_matches_tile_parts() {
        return Err(ContainerError::Corrupt(
            "TLM lengths do not match the tile-parts in the codestream".to_string(),
        )
        .into());
    }
    Ok(())
}

fn report(inspection: &Inspection, list_tiles: bool) -> String {
    let header = &inspection.header;
    let main = &inspection.main_header;
    let mut out = String::new();

    out.push_str(&format!("Container version {}\n", header.version));
    out.push_str(&format!("  File length:     {} bytes\n", header.file_length));
    out.push_str(&format!(
        "  Codestream:      {} bytes at offset {}\n",
        header.codestream_length, header.codestream_offset
    ));
    out.push_str(&format!(
        "  Overview:        {}x{} (decimation {})\n",
        header.output_width, header.output_height, header.decimation
    ));
    out.push_str(&format!(
        "  Tiles:           {}x{} of {}x{}\n",
        header.tiles_wide, header.tiles_high, header.tile_width, header.tile_height
    ));
    out.push_str(&format!(
        "  Pixels:          {} band(s) of {}\n",
        header.bands, header.scalar
    ));
    out.push_str(&format!(
        "  Tile-parts:      {} (max {} per tile)\n",
        inspection.tile_parts.len(),
        main.max_tile_parts
    ));
    out.push_str(&format!(
        "  TLM entries:     {} ({})\n",
        inspection.tlm_records.len(),
        if inspection.tlm_matches_tile_parts() {
            "consistent"
        } else {
            "MISMATCH"
        }
    ));
    let dropped = inspection.dropped_tiles();
    if !dropped.is_empty() {
        out.push_str(&format!("  Dropped tiles:   {:?}\n", dropped));
    }

    if list_tiles {
        out.push('\n');
        for part in &inspection.tile_parts {
            out.push_str(&format!(
                "  tile {:>6} part {}/{}  offset {:>10}  length {}\n",
                part.tile,
                part.part + 1,
                part.num_parts,
                part.offset,
                part.length
            ));
        }
    }
    out
}
