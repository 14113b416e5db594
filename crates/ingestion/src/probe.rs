//! Source-format probes: predicates over a file's path and leading bytes.
//!
//! Each probe pairs with a loader in the ingestion registry; the registry
//! scan is ordered and the first matching probe wins.

use std::path::Path;

/// netCDF classic ("CDF\x01"/"CDF\x02"), HDF5-backed netCDF-4
/// ("\x89HDF"), or a conventional extension.
pub fn is_netcdf(path: &Path, header: &[u8]) -> bool {
    if header.starts_with(b"CDF\x01") || header.starts_with(b"CDF\x02") {
        return true;
    }
    if header.starts_with(b"\x89HDF") {
        return true;
    }
    matches!(
        extension(path).as_deref(),
        Some("nc") | Some("nc4") | Some("cdf")
    )
}

/// Manifest of gridded files: `.lst`/`.list` extension, or a text file
/// whose first record names an existing file.
pub fn is_file_list(path: &Path, header: &[u8]) -> bool {
    if matches!(extension(path).as_deref(), Some("lst") | Some("list")) {
        return true;
    }
    if !header_is_text(header) {
        return false;
    }
    match first_record(path) {
        Some(first) => {
            !line_is_numeric(&first)
                && (Path::new(&first).exists()
                    || path
                        .parent()
                        .unwrap_or_else(|| Path::new("."))
                        .join(&first)
                        .exists())
        }
        None => false,
    }
}

/// Bare 2-D numeric text.
pub fn is_matrix_dump(path: &Path, header: &[u8]) -> bool {
    if !header_is_text(header) {
        return false;
    }
    first_record(path).is_some_and(|first| line_is_numeric(&first))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn header_is_text(header: &[u8]) -> bool {
    !header.is_empty() && header.iter().all(|&b| b == b'\t' || b == b'\n' || b == b'\r' || (0x20..0x7f).contains(&b))
}

fn first_record(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
}

fn line_is_numeric(line: &str) -> bool {
    line.split_whitespace().all(|tok| {
        tok.parse::<f64>().is_ok() || tok.eq_ignore_ascii_case("nan")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(bytes)
            .unwrap();
        path
    }

    #[test]
    fn test_netcdf_magic_and_extension() {
        let dir = TempDir::new().unwrap();
        let p = write_file(&dir, "data.bin", b"CDF\x01rest");
        assert!(is_netcdf(&p, b"CDF\x01rest"));
        let h = write_file(&dir, "data.h5", b"\x89HDF\r\n\x1a\n");
        assert!(is_netcdf(&h, b"\x89HDF\r\n\x1a\n"));
        let byext = write_file(&dir, "empty.nc", b"");
        assert!(is_netcdf(&byext, b""));
    }

    #[test]
    fn test_matrix_dump_content() {
        let dir = TempDir::new().unwrap();
        let p = write_file(&dir, "field.txt", b"1.0 2.0 3.0\n4.0 5.0 6.0\n");
        assert!(is_matrix_dump(&p, b"1.0 2.0"));
        assert!(!is_file_list(&p, b"1.0 2.0"));
    }

    #[test]
    fn test_manifest_by_extension_and_content() {
        let dir = TempDir::new().unwrap();
        let byext = write_file(&dir, "inputs.lst", b"a.nc\nb.nc\n");
        assert!(is_file_list(&byext, b"a.nc\nb."));

        let member = write_file(&dir, "member.txt", b"1 2\n3 4\n");
        let name = member.file_name().unwrap().to_str().unwrap();
        let manifest = write_file(&dir, "inputs.dat", name.as_bytes());
        assert!(is_file_list(&manifest, name.as_bytes()));
        assert!(!is_matrix_dump(&manifest, name.as_bytes()));
    }

    #[test]
    fn test_binary_junk_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let p = write_file(&dir, "junk.bin", &[0u8, 1, 2, 3, 250, 251]);
        let header = [0u8, 1, 2, 3, 250, 251];
        assert!(!is_netcdf(&p, &header));
        assert!(!is_file_list(&p, &header));
        assert!(!is_matrix_dump(&p, &header));
    }
}
