// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Write;
use std::path::Path;
use crate::{ Error, GpsSample, Result };

pub const GPX_CREATOR: &str = "mp4-gpx Novatek MP4 GPS parser";

/// Renders `samples` as a GPX 1.0 document with a single track and segment.
pub fn render_gpx(samples: &[GpsSample], output_name: &str) -> String {
    let name = escape_xml(output_name);
    let mut gpx = String::with_capacity(512 + samples.len() * 128);
    gpx.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    gpx.push_str("<gpx version=\"1.0\"\n");
    gpx.push_str(&format!("\tcreator=\"{GPX_CREATOR}\"\n"));
    gpx.push_str("\txmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"\n");
    gpx.push_str("\txmlns=\"http://www.topografix.com/GPX/1/0\"\n");
    gpx.push_str("\txsi:schemaLocation=\"http://www.topografix.com/GPX/1/0 http://www.topografix.com/GPX/1/0/gpx.xsd\">\n");
    gpx.push_str(&format!("\t<name>{name}</name>\n"));
    gpx.push_str(&format!("\t<trk><name>{name}</name><trkseg>\n"));
    for s in samples {
        // Writing to a String can't fail
        let _ = write!(gpx, "\t\t<trkpt lat=\"{:.6}\" lon=\"{:.6}\"><time>{}</time><speed>{:.6}</speed>", s.latitude, s.longitude, s.timestamp, s.speed_mps);
        if let Some(heading) = s.heading_deg {
            let _ = write!(gpx, "<course>{heading:.6}</course>");
        }
        gpx.push_str("</trkpt>\n");
    }
    gpx.push_str("\t</trkseg></trk>\n");
    gpx.push_str("</gpx>\n");
    gpx
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&'  => out.push_str("&amp;"),
            '<'  => out.push_str("&lt;"),
            '>'  => out.push_str("&gt;"),
            '"'  => out.push_str("&quot;"),
            _    => out.push(c),
        }
    }
    out
}

/// Fails with [`Error::OutputExists`] if `path` exists and `force` is not set.
pub fn check_output(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::OutputExists(path.to_path_buf()));
    }
    Ok(())
}

/// Writes the GPX document to `path`, named after the path itself.
pub fn write_gpx(path: &Path, samples: &[GpsSample]) -> Result<()> {
    let gpx = render_gpx(samples, &path.display().to_string());
    std::fs::write(path, gpx)?;
    Ok(())
}
