//! Materialises the supervised executable and its shared libraries into a
//! private, uniquely named directory before launch.

use crate::config::StagingConfig;
use crate::error::StagingError;
use backon::{ConstantBuilder, Retryable};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

const COPY_BUFFER_LENGTH: usize = 1024;
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(100);
const REMOVE_RETRIES: usize = 3;

/// Where the bytes of an artifact come from
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactSource {
    /// Compiled into the host binary
    Embedded(Cow<'static, [u8]>),
    /// Shipped next to the host, e.g. in a bundle directory
    File(PathBuf),
}

/// A single file of the payload
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub source: ArtifactSource,
}

impl Artifact {
    pub fn embedded(name: impl Into<String>, bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            name: name.into(),
            source: ArtifactSource::Embedded(bytes.into()),
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: ArtifactSource::File(path.into()),
        }
    }

    fn open(&self) -> Result<Box<dyn Read + '_>, StagingError> {
        match &self.source {
            ArtifactSource::Embedded(bytes) => {
                let bytes: &[u8] = bytes;
                Ok(Box::new(bytes))
            }
            ArtifactSource::File(path) => match File::open(path) {
                Ok(file) => Ok(Box::new(file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(StagingError::MissingArtifact(path.clone()))
                }
                Err(source) => Err(StagingError::Copy {
                    artifact: self.name.clone(),
                    source,
                }),
            },
        }
    }

    fn validate_name(&self) -> Result<(), StagingError> {
        let invalid = self.name.is_empty()
            || self.name == "."
            || self.name == ".."
            || self.name.contains(['/', '\\'])
            || Path::new(&self.name).is_absolute();
        if invalid {
            return Err(StagingError::InvalidArtifactName(self.name.clone()));
        }
        Ok(())
    }
}

/// The entry executable plus the libraries it needs at runtime
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    entry: Artifact,
    libraries: Vec<Artifact>,
}

impl Payload {
    pub fn new(entry: Artifact) -> Self {
        Self {
            entry,
            libraries: Vec::new(),
        }
    }

    /// Payload whose files all live in `dir`
    pub fn from_bundle<S: AsRef<str>>(dir: &Path, entry: &str, libraries: &[S]) -> Self {
        let mut payload = Self::new(Artifact::file(entry, dir.join(entry)));
        for library in libraries {
            let name = library.as_ref();
            payload = payload.with_library(Artifact::file(name, dir.join(name)));
        }
        payload
    }

    pub fn with_library(mut self, library: Artifact) -> Self {
        self.libraries.push(library);
        self
    }

    pub fn entry(&self) -> &Artifact {
        &self.entry
    }

    fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.entry).chain(self.libraries.iter())
    }
}

/// A staged copy of the payload. The directory is removed by
/// [`StagedPayload::remove`], or silently when the value is dropped.
#[derive(Debug)]
pub struct StagedPayload {
    executable_path: PathBuf,
    dir: TempDir,
}

impl StagedPayload {
    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }

    pub fn working_directory(&self) -> &Path {
        self.dir.path()
    }

    /// Recursively delete the working directory, reporting the last failure.
    ///
    /// A child that was just killed may still hold files open, so failed
    /// attempts are retried a few times. A directory that is already gone
    /// counts as removed.
    pub async fn remove(self) -> io::Result<()> {
        let dir: &Path = self.dir.path();
        let backoff = ConstantBuilder::default()
            .with_delay(REMOVE_RETRY_DELAY)
            .with_max_times(REMOVE_RETRIES);

        let remove = move || async move {
            match tokio::fs::remove_dir_all(dir).await {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                result => result,
            }
        };

        remove
            .retry(backoff)
            .notify(|e, after| {
                warn!(path = %dir.display(), "Temporary directory removal failed, retrying in {after:?}: {e}")
            })
            .await
        // The TempDir guard drops here and finds nothing left on success
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayloadStager {
    config: StagingConfig,
}

impl PayloadStager {
    pub fn new(config: StagingConfig) -> Self {
        Self { config }
    }

    /// Copy every artifact of `payload` into a fresh directory
    pub fn stage(&self, payload: &Payload) -> Result<StagedPayload, StagingError> {
        for artifact in payload.artifacts() {
            artifact.validate_name()?;
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.config.prefix);
        let dir = match &self.config.parent_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(StagingError::CreateDirectory)?;

        for artifact in payload.artifacts() {
            let target = dir.path().join(&artifact.name);
            Self::copy_artifact(artifact, &target)?;
        }

        let executable_path = dir.path().join(&payload.entry().name);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&executable_path, std::fs::Permissions::from_mode(0o755))
                .map_err(|source| StagingError::Copy {
                    artifact: payload.entry().name.clone(),
                    source,
                })?;
        }

        debug!(
            path = %dir.path().display(),
            "Payload staged into temporary directory"
        );

        Ok(StagedPayload {
            executable_path,
            dir,
        })
    }

    fn copy_artifact(artifact: &Artifact, target: &Path) -> Result<(), StagingError> {
        let mut input = artifact.open()?;
        let copy_error = |source| StagingError::Copy {
            artifact: artifact.name.clone(),
            source,
        };

        let mut output = BufWriter::new(File::create(target).map_err(copy_error)?);
        copy_stream(&mut input, &mut output).map_err(copy_error)?;
        output.flush().map_err(copy_error)?;
        Ok(())
    }
}

fn copy_stream(input: &mut dyn Read, output: &mut dyn Write) -> io::Result<u64> {
    let mut buffer = [0u8; COPY_BUFFER_LENGTH];
    let mut total = 0u64;
    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => return Ok(total),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        output.write_all(&buffer[..read])?;
        total += read as u64;
    }
}
