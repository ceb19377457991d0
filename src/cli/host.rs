//! Host preparation
//!
//! Tasks get the directory holding the suite files on the docker host. Locally
//! that is the descriptor's own directory. With a docker-machine host the
//! directory is recreated under `.compose-suite/<suite>` on the machine and
//! the descriptor's directory is copied there first.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::common::{Error, Result};

/// Remote sync root, relative to the machine user's home
const REMOTE_ROOT: &str = ".compose-suite";

/// Return the sync directory for `descriptor`, uploading it if `machine` is set
pub async fn prepare_host(descriptor: &Path, machine: Option<&str>, suite: &str) -> Result<PathBuf> {
    let Some(machine) = machine else {
        return local_dir(descriptor);
    };

    let tool = which::which("docker-machine")
        .map_err(|e| Error::HostSetup(format!("docker-machine not found: {}", e)))?;
    prepare_remote(&tool, descriptor, machine, suite).await
}

/// Recreate the sync directory on `machine` and upload the suite files
async fn prepare_remote(
    tool: &Path,
    descriptor: &Path,
    machine: &str,
    suite: &str,
) -> Result<PathBuf> {
    let host_dir = format!("{}/{}", REMOTE_ROOT, suite);

    println!("Preparing host machine {}", machine);
    machine_cmd(tool, &["ssh", machine, "rm", "-rf", &host_dir])
        .await
        .map_err(|e| Error::HostSetup(format!("Could not delete dir {}: {}", host_dir, e)))?;
    machine_cmd(tool, &["ssh", machine, "mkdir", "-p", &host_dir])
        .await
        .map_err(|e| Error::HostSetup(format!("Could not create dir {}: {}", host_dir, e)))?;

    println!("Uploading files");
    let source_dir = local_dir(descriptor)?;
    let target = format!("{}:{}", machine, host_dir);
    for file in upload_list(&source_dir)? {
        tracing::info!("Uploading {}", file.display());
        let file_arg = file.display().to_string();
        machine_cmd(tool, &["scp", "-r", &file_arg, &target])
            .await
            .map_err(|e| {
                Error::HostSetup(format!("Could not upload file {}: {}", file.display(), e))
            })?;
    }

    let home = machine_cmd(tool, &["ssh", machine, "pwd"])
        .await
        .map_err(|e| Error::HostSetup(format!("Could not determine home dir on host: {}", e)))?;
    Ok(Path::new(home.trim()).join(host_dir))
}

/// Absolute directory containing the descriptor
fn local_dir(descriptor: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(descriptor)?;
    Ok(absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/")))
}

/// Entries of `dir` to copy, sorted for a stable upload order
fn upload_list(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    files.sort();
    Ok(files)
}

/// Run docker-machine and return its stdout
async fn machine_cmd(tool: &Path, args: &[&str]) -> std::result::Result<String, String> {
    tracing::debug!("docker-machine {}", args.join(" "));
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "{}\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
