// Weatherpi - Environmental sampling job for a Raspberry PI
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::config::ImageSettings;
use crate::notify::{self, Notifier};
use chrono::NaiveDateTime;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::{fs, io};

pub const CAMERA_PROGRAM: &str = "raspistill";
pub const SHELL_PROGRAM: &str = "ssh";
pub const COPY_PROGRAM: &str = "scp";

/// Progress of capturing an image and copying it to the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStage {
    Idle,
    Capturing,
    LocalReady,
    RemoteDirEnsured,
    Transferred,
    Failed,
}

impl ImageStage {
    pub fn as_label(&self) -> &'static str {
        match self {
            ImageStage::Idle => "idle",
            ImageStage::Capturing => "capturing",
            ImageStage::LocalReady => "local_ready",
            ImageStage::RemoteDirEnsured => "remote_dir_ensured",
            ImageStage::Transferred => "transferred",
            ImageStage::Failed => "failed",
        }
    }
}

/// Error running an external program
#[derive(Debug)]
pub enum CommandError {
    Spawn(String, io::Error),
    Status(String, Option<i32>),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Spawn(program, e) => write!(f, "unable to run {}: {}", program, e),
            CommandError::Status(program, Some(code)) => write!(f, "{} exited with status {}", program, code),
            CommandError::Status(program, None) => write!(f, "{} was terminated by a signal", program),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommandError::Spawn(_, ref e) => Some(e),
            CommandError::Status(_, _) => None,
        }
    }
}

/// Error capturing or transferring an image
#[derive(Debug)]
pub enum ImageError {
    LocalDirectory(PathBuf, io::Error),
    RemotePath(String),
    Command(CommandError),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::LocalDirectory(path, e) => write!(f, "unable to create {}: {}", path.display(), e),
            ImageError::RemotePath(path) => write!(f, "remote path '{}' can't be used as an scp target", path),
            ImageError::Command(e) => e.fmt(f),
        }
    }
}

impl Error for ImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImageError::LocalDirectory(_, ref e) => Some(e),
            ImageError::RemotePath(_) => None,
            ImageError::Command(ref e) => Some(e),
        }
    }
}

impl From<CommandError> for ImageError {
    fn from(e: CommandError) -> Self {
        ImageError::Command(e)
    }
}

/// Runs external programs to completion. No timeout is applied.
pub trait CommandRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<(), CommandError>;
}

/// CommandRunner that starts real processes, inheriting stdout and stderr.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<(), CommandError> {
        tracing::debug!(message = "running command", program = program, args = ?args);
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| CommandError::Spawn(program.to_owned(), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Status(program.to_owned(), status.code()))
        }
    }
}

/// Quote `s` so that a POSIX shell on the remote host treats it as a single word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Return true if `path` reaches the remote host as a single word when used in an
/// scp target. Depending on the protocol in use, scp may expand the target with the
/// remote shell, so whitespace and shell metacharacters are not allowed.
pub fn is_scp_safe(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| !c.is_whitespace() && !"'\"\\`$;&|<>*?()[]{}!#~".contains(c))
}

/// File name of the image taken at `timestamp`: date and time to the minute, with
/// colons swapped for hyphens.
pub fn image_file_name(timestamp: NaiveDateTime) -> String {
    let date = timestamp.format("%Y-%m-%d").to_string();
    let time = timestamp.format("%H:%M").to_string();
    format!("{}_{}.jpg", date, time.replace(':', "-"))
}

/// Location of an image on local storage and on the remote host. Both are
/// organized into a directory per day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub date_dir: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub remote_dir: String,
}

impl ImageArtifact {
    pub fn new(settings: &ImageSettings, timestamp: NaiveDateTime) -> Self {
        let date_dir = timestamp.format("%Y-%m-%d").to_string();
        let file_name = image_file_name(timestamp);
        let local_path = settings.output.join(&date_dir).join(&file_name);
        let remote_dir = format!("{}/{}", settings.remote_dir.trim_end_matches('/'), date_dir);

        ImageArtifact {
            date_dir,
            file_name,
            local_path,
            remote_dir,
        }
    }

    fn local_dir(&self) -> &Path {
        self.local_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Outcome of the image stage: where it stopped and which file it was working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutcome {
    pub stage: ImageStage,
    pub artifact: ImageArtifact,
}

/// Take a still image with the camera, writing it to the local path of `artifact`.
pub fn capture(
    settings: &ImageSettings,
    artifact: &ImageArtifact,
    runner: &mut dyn CommandRunner,
) -> Result<(), ImageError> {
    let dir = artifact.local_dir();
    fs::create_dir_all(dir).map_err(|e| ImageError::LocalDirectory(dir.to_owned(), e))?;

    let mut args = vec!["-q".to_owned(), settings.quality.to_string()];
    if settings.vflip {
        args.push("-vf".to_owned());
    }
    if settings.hflip {
        args.push("-hf".to_owned());
    }
    args.push("-o".to_owned());
    args.push(artifact.local_path.display().to_string());

    runner.run(CAMERA_PROGRAM, &args)?;
    Ok(())
}

/// Create the dated directory on the remote host if it doesn't already exist.
pub fn ensure_remote_dir(
    settings: &ImageSettings,
    artifact: &ImageArtifact,
    runner: &mut dyn CommandRunner,
) -> Result<(), ImageError> {
    let args = vec![
        settings.remote_host.clone(),
        format!("mkdir -p {}", shell_quote(&artifact.remote_dir)),
    ];

    runner.run(SHELL_PROGRAM, &args)?;
    Ok(())
}

/// Copy the local image into the dated directory on the remote host.
pub fn transfer(
    settings: &ImageSettings,
    artifact: &ImageArtifact,
    runner: &mut dyn CommandRunner,
) -> Result<(), ImageError> {
    if !is_scp_safe(&artifact.remote_dir) {
        return Err(ImageError::RemotePath(artifact.remote_dir.clone()));
    }

    let args = vec![
        artifact.local_path.display().to_string(),
        format!("{}:{}/", settings.remote_host, artifact.remote_dir),
    ];

    runner.run(COPY_PROGRAM, &args)?;
    Ok(())
}

/// Capture an image and copy it to the remote host.
///
/// Any failure is logged and sent to `notifier`, then the remaining steps are
/// skipped. Nothing is retried and no error is returned.
pub fn capture_and_transfer(
    settings: &ImageSettings,
    timestamp: NaiveDateTime,
    runner: &mut dyn CommandRunner,
    notifier: &dyn Notifier,
) -> ImageOutcome {
    let artifact = ImageArtifact::new(settings, timestamp);

    let stage = match run_stages(settings, &artifact, runner) {
        Ok(stage) => stage,
        Err((stage, e)) => {
            tracing::error!(
                message = "image stage failed",
                stage = stage.as_label(),
                path = %artifact.local_path.display(),
                error = %e
            );

            let stamp = timestamp.format("%Y-%m-%d %H:%M:%S");
            let body = if stage == ImageStage::Capturing {
                format!("Error taking image at {}:\n{}", stamp, e)
            } else {
                format!(
                    "Error copying image {} to {}:{} at {}:\n{}",
                    artifact.file_name, settings.remote_host, artifact.remote_dir, stamp, e
                )
            };

            notify::best_effort(notifier, &body);
            ImageStage::Failed
        }
    };

    ImageOutcome { stage, artifact }
}

/// Run each step in order, returning the stage that was in progress when a step failed.
fn run_stages(
    settings: &ImageSettings,
    artifact: &ImageArtifact,
    runner: &mut dyn CommandRunner,
) -> Result<ImageStage, (ImageStage, ImageError)> {
    let mut stage = ImageStage::Capturing;
    capture(settings, artifact, runner).map_err(|e| (stage, e))?;

    stage = ImageStage::LocalReady;
    tracing::info!(message = "captured image", path = %artifact.local_path.display());
    ensure_remote_dir(settings, artifact, runner).map_err(|e| (stage, e))?;

    stage = ImageStage::RemoteDirEnsured;
    tracing::debug!(message = "ensured remote directory", remote_dir = %artifact.remote_dir);
    transfer(settings, artifact, runner).map_err(|e| (stage, e))?;

    tracing::info!(
        message = "copied image to remote host",
        remote_host = %settings.remote_host,
        remote_dir = %artifact.remote_dir
    );
    Ok(ImageStage::Transferred)
}

#[cfg(test)]
pub(crate) use self::test::FakeRunner;
