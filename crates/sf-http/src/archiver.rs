//! Packages a finished pipeline's output directory into a tar.gz archive.

use std::fs::File;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use sf_types::SfResult;

/// Archive `source` (recursively) into the tar.gz file at `destination`.
pub fn archive_dir(source: &Path, destination: &Path) -> SfResult<()> {
    let file = File::create(destination)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let root = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    builder.append_dir_all(&root, source)?;

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    tracing::info!(
        "Archived {} into {}",
        source.display(),
        destination.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Write;

    #[test]
    fn archive_contains_the_output_files() {
        let workspace = tempfile::tempdir().unwrap();
        let results = workspace.path().join("results");
        std::fs::create_dir_all(&results).unwrap();
        let mut file = File::create(results.join("bundle.json")).unwrap();
        file.write_all(b"{}").unwrap();

        let archive_path = workspace.path().join("job.tar.gz");
        archive_dir(&results, &archive_path).unwrap();
        assert!(archive_path.exists());

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&archive_path).unwrap()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("bundle.json")));
    }
}
