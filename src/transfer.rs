use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::config::FileSet;
use crate::error::LoadError;
use crate::progress_message::Progress;
use crate::remote::Remote;

const DIR_PERMS: u32 = 0o755;

// Copy the whole of `local_dir` into `remote_dir`, like `scp -r local_dir/. remote_dir`.
// Directories are created parents first, then files uploaded one at a time.
pub fn transfer_directory<R: Remote + ?Sized>(
    remote: &R,
    local_dir: &Path,
    remote_dir: &str,
    progress: &dyn Fn(Progress),
) -> Result<(), LoadError> {
    let t_start = Instant::now();
    let remote_dir = remote_dir.trim_end_matches('/');
    let (dirs, files) = list_dir(local_dir).map_err(|err| LoadError::Transfer {
        path: local_dir.display().to_string(),
        reason: err.to_string(),
    })?;

    remote
        .mkdir(remote_dir, DIR_PERMS)
        .map_err(|err| transfer_err(remote_dir, err))?;
    for dir in dirs {
        let dst = format!("{remote_dir}/{dir}");
        debug!("mkdir remote: {dst}");
        remote
            .mkdir(&dst, DIR_PERMS)
            .map_err(|err| transfer_err(&dst, err))?;
    }

    let num_files = files.len();
    let mut num_bytes = 0;
    for filename in files {
        let src = local_dir.join(&filename);
        let dst = format!("{remote_dir}/{filename}");
        let size = remote
            .upload(&src, &dst)
            .map_err(|err| transfer_err(&filename, err))?;
        num_bytes += size;
        progress(Progress::Uploaded(filename, size));
    }

    progress(Progress::Copied(num_files, num_bytes, t_start.elapsed()));
    Ok(())
}

// Every file we are going to load must be in the directory we copy.
// Checked before we touch the network.
pub fn check_files_present(local_dir: &Path, files: &FileSet) -> Result<(), LoadError> {
    for f in files.iter() {
        let p = local_dir.join(f);
        if !p.is_file() {
            return Err(LoadError::Transfer {
                path: p.display().to_string(),
                reason: "file not found".to_string(),
            });
        }
    }
    Ok(())
}

fn transfer_err(path: &str, err: anyhow::Error) -> LoadError {
    LoadError::Transfer {
        path: path.to_string(),
        reason: format!("{err:#}"),
    }
}

// returns (directories, files) under `root`, relative to it with '/' separators, sorted.
// Sorted means a directory always comes before its sub-directories.
fn list_dir(root: &Path) -> io::Result<(Vec<String>, Vec<String>)> {
    let mut dirs_out = Vec::new();
    let mut files_out = Vec::new();
    let mut dirs: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(next_dir) = dirs.pop() {
        for entry in fs::read_dir(next_dir)? {
            let file = entry?;
            let path = file.path();
            let relative = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if file.file_type()?.is_dir() {
                dirs_out.push(relative);
                dirs.push(path);
            } else {
                files_out.push(relative);
            }
        }
    }
    dirs_out.sort();
    files_out.sort();
    Ok((dirs_out, files_out))
}
