//! Artifact packaging
//!
//! Model artifacts travel inside queue messages as a deflated zip archive
//! encoded as MIME-style base64 (76 character lines, trailing newline). This
//! format is shared with existing producers and consumers.
//!
//! Files given directly are stored under their base name. Directories are
//! walked recursively and their contents stored relative to the directory
//! itself, so extracting into a fresh directory recreates the layout the
//! learner produced.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use ccube_sdk::errors::WorkerError;

const LINE_LENGTH: usize = 76;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),
}

impl From<CodecError> for WorkerError {
    fn from(e: CodecError) -> Self {
        WorkerError::Codec(e.to_string())
    }
}

/// Packs and unpacks model artifacts
pub struct ArtifactCodec;

impl ArtifactCodec {
    /// Packs the given files and directories into a transportable string.
    ///
    /// Paths that do not exist are skipped.
    pub fn encode<P: AsRef<Path>>(paths: &[P]) -> Result<String, CodecError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for path in paths {
            let path = path.as_ref();
            if path.is_file() {
                let name = path
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| CodecError::NonUtf8Path(path.to_path_buf()))?;
                add_file(&mut writer, path, &archive_name(&name)?, options)?;
            } else if path.is_dir() {
                add_directory(&mut writer, path, path, options)?;
            } else {
                warn!("Skipping missing artifact path {}", path.display());
            }
        }

        let bytes = writer.finish()?.into_inner();
        debug!("Packed {} artifact bytes", bytes.len());

        Ok(wrap_lines(&BASE64.encode(bytes)))
    }

    /// Unpacks an encoded artifact into `destination`
    pub fn decode(encoded: &str, destination: &Path) -> Result<(), CodecError> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64.decode(compact)?;

        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        fs::create_dir_all(destination)?;
        archive.extract(destination)?;

        debug!(
            "Unpacked {} archive entries into {}",
            archive.len(),
            destination.display()
        );
        Ok(())
    }
}

fn add_file<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    source: &Path,
    name: &str,
    options: FileOptions,
) -> Result<(), CodecError> {
    writer.start_file(name, options)?;
    let mut file = File::open(source)?;
    io::copy(&mut file, writer)?;
    Ok(())
}

fn add_directory<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    root: &Path,
    directory: &Path,
    options: FileOptions,
) -> Result<(), CodecError> {
    let mut entries = fs::read_dir(directory)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for entry in entries {
        let relative = entry
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .map_err(|_| CodecError::NonUtf8Path(entry.clone()))?;
        let name = archive_name(&relative)?;

        // linked files are stored by content, linked directories are not walked
        if fs::symlink_metadata(&entry)?.file_type().is_symlink() && entry.is_dir() {
            debug!("Skipping linked directory {}", entry.display());
            continue;
        }

        if entry.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
            add_directory(writer, root, &entry, options)?;
        } else if entry.is_file() {
            add_file(writer, &entry, &name, options)?;
        }
    }
    Ok(())
}

/// Archive entry names always use `/`, whatever the host separator
fn archive_name(relative: &Path) -> Result<String, CodecError> {
    relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| CodecError::NonUtf8Path(relative.to_path_buf()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|parts| parts.join("/"))
}

fn wrap_lines(encoded: &str) -> String {
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH + 1);
    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        // base64 output is ASCII, chunks always fall on char boundaries
        wrapped.push_str(&String::from_utf8_lossy(chunk));
        wrapped.push('\n');
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_single_file_stored_by_base_name() {
        let source = TempDir::new().unwrap();
        let file = source.path().join("nested").join("mostAccurate.txt");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "(+ x1 x2)\n").unwrap();

        let encoded = ArtifactCodec::encode(&[&file]).unwrap();

        let destination = TempDir::new().unwrap();
        ArtifactCodec::decode(&encoded, destination.path()).unwrap();
        assert_eq!(
            fs::read_to_string(destination.path().join("mostAccurate.txt")).unwrap(),
            "(+ x1 x2)\n"
        );
    }

    #[test]
    fn test_encoded_lines_are_wrapped() {
        let source = TempDir::new().unwrap();
        let file = source.path().join("model.bin");
        fs::write(&file, vec![7u8; 4096]).unwrap();

        let encoded = ArtifactCodec::encode(&[&file]).unwrap();

        assert!(encoded.ends_with('\n'));
        assert!(encoded.lines().all(|line| line.len() <= LINE_LENGTH));
        assert!(encoded.is_ascii());
    }

    #[test]
    fn test_missing_paths_are_skipped() {
        let source = TempDir::new().unwrap();
        let present = source.path().join("present.txt");
        fs::write(&present, "ok").unwrap();

        let encoded =
            ArtifactCodec::encode(&[present.clone(), source.path().join("absent.txt")]).unwrap();

        let destination = TempDir::new().unwrap();
        ArtifactCodec::decode(&encoded, destination.path()).unwrap();
        assert!(destination.path().join("present.txt").exists());
        assert!(!destination.path().join("absent.txt").exists());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let destination = TempDir::new().unwrap();
        assert!(matches!(
            ArtifactCodec::decode("not base64 at all!", destination.path()),
            Err(CodecError::Base64(_))
        ));
        assert!(matches!(
            ArtifactCodec::decode("aGVsbG8=", destination.path()),
            Err(CodecError::Archive(_))
        ));
    }

    #[test]
    fn test_decode_accepts_dot_prefixed_entries() {
        // Some producers store entries as ./name
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("./mostAccurate.txt", FileOptions::default())
            .unwrap();
        writer.write_all(b"(* x1 0.5)").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let payload = wrap_lines(&BASE64.encode(bytes));

        let destination = TempDir::new().unwrap();
        ArtifactCodec::decode(&payload, destination.path()).unwrap();

        assert_eq!(
            fs::read_to_string(destination.path().join("mostAccurate.txt")).unwrap(),
            "(* x1 0.5)"
        );
    }

    #[test]
    fn test_directory_layout_preserved() {
        let source = TempDir::new().unwrap();
        let model_dir = source.path().join("model");
        fs::create_dir_all(model_dir.join("weights")).unwrap();
        fs::write(model_dir.join("config.txt"), "depth=3").unwrap();
        fs::write(model_dir.join("weights").join("layer0"), "0.1 0.2").unwrap();

        let encoded = ArtifactCodec::encode(&[&model_dir]).unwrap();

        let destination = TempDir::new().unwrap();
        ArtifactCodec::decode(&encoded, destination.path()).unwrap();
        assert_eq!(
            fs::read_to_string(destination.path().join("config.txt")).unwrap(),
            "depth=3"
        );
        assert_eq!(
            fs::read_to_string(destination.path().join("weights").join("layer0")).unwrap(),
            "0.1 0.2"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_directories_are_not_walked() {
        let source = TempDir::new().unwrap();
        let model_dir = source.path().join("model");
        let shared = source.path().join("shared");
        fs::create_dir_all(&model_dir).unwrap();
        fs::create_dir_all(&shared).unwrap();
        fs::write(model_dir.join("best.txt"), "(+ x1 1)").unwrap();
        fs::write(shared.join("data.csv"), "1,2").unwrap();
        fs::write(shared.join("note.txt"), "kept").unwrap();
        std::os::unix::fs::symlink(&model_dir, model_dir.join("loop")).unwrap();
        std::os::unix::fs::symlink(&shared, model_dir.join("shared")).unwrap();
        std::os::unix::fs::symlink(shared.join("note.txt"), model_dir.join("note.txt")).unwrap();

        let encoded = ArtifactCodec::encode(&[&model_dir]).unwrap();

        let destination = TempDir::new().unwrap();
        ArtifactCodec::decode(&encoded, destination.path()).unwrap();
        let mut names: Vec<String> = fs::read_dir(destination.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["best.txt", "note.txt"]);
        assert_eq!(
            fs::read_to_string(destination.path().join("note.txt")).unwrap(),
            "kept"
        );
    }
}
