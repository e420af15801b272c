// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::{ Path, PathBuf };
use walkdir::WalkDir;

/// Length of the "_NNN.MP4" suffix that numbers the segments of one recording
const SEGMENT_SUFFIX_LEN: usize = 8;

fn is_mp4(path: &Path) -> bool {
    path.extension().and_then(|x| x.to_str()).is_some_and(|x| x.eq_ignore_ascii_case("mp4"))
}

/// Expands the given paths into MP4 files: directories are listed one level deep,
/// files are taken as is if they have an .mp4 extension. The result is sorted with [`sort_segments`].
pub fn collect_inputs<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            log::info!("Directory '{}' specified as input, listing...", input.display());
            for entry in WalkDir::new(input).min_depth(1).max_depth(1).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() && is_mp4(entry.path()) => {
                        log::info!("Queueing file '{}' for processing...", entry.path().display());
                        files.push(entry.into_path());
                    }
                    Ok(_) => { }
                    Err(e) => log::warn!("Failed to list '{}': {e}", input.display()),
                }
            }
        } else if input.is_file() && is_mp4(input) {
            log::info!("Queueing file '{}' for processing...", input.display());
            files.push(input.to_path_buf());
        } else {
            log::warn!("Skipping invalid input '{}'...", input.display());
        }
    }
    sort_segments(&mut files);
    files
}

/// Whether the file name looks like "<name>_NNN.ext"
fn is_segment_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|x| x.to_str()) else { return false; };
    let b = name.as_bytes();
    b.len() > SEGMENT_SUFFIX_LEN &&
        b[b.len() - 8] == b'_' &&
        b[b.len() - 7..b.len() - 4].iter().all(u8::is_ascii_digit) &&
        b[b.len() - 4] == b'.'
}

fn segment_key(path: &Path) -> String {
    let s = path.to_string_lossy();
    let n = s.chars().count().saturating_sub(SEGMENT_SUFFIX_LEN);
    s.chars().take(n).collect()
}

/// Stable sort by path with the segment suffix cut off. The cut is blind, so names of
/// another shape may end up in an odd order; those are reported.
pub fn sort_segments(files: &mut [PathBuf]) {
    for f in files.iter().filter(|f| !is_segment_name(f)) {
        log::warn!("'{}' doesn't end in _NNN.ext, its position in the track may be wrong", f.display());
    }
    files.sort_by_cached_key(|f| segment_key(f));
}
