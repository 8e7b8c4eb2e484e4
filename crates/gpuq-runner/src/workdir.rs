//! Per-task work trees
//!
//! Each task owns `<tasks_root>/task_<id>/` with a reproducible script pair:
//! `command.sh` (the user command framed by diagnostics) and `run.sh` (the
//! session entry point). The session appends combined output to `tmux.log`
//! and `run.sh` records the command's exit status in `exit_code`, which is
//! the sole source of truth for reconciliation.

use gpuq_core::{join_gpu_indices, GpuqError, GpuqResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolved file locations inside one task directory
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub dir: PathBuf,
    pub command_script: PathBuf,
    pub run_script: PathBuf,
    pub log_file: PathBuf,
    pub exit_code_file: PathBuf,
}

impl TaskPaths {
    fn under(dir: PathBuf) -> Self {
        Self {
            command_script: dir.join("command.sh"),
            run_script: dir.join("run.sh"),
            log_file: dir.join("tmux.log"),
            exit_code_file: dir.join("exit_code"),
            dir,
        }
    }
}

/// Factory for per-task directories and scripts
pub struct WorkTree {
    /// Root under which `task_<id>` directories are created
    tasks_root: PathBuf,
    /// Directory user commands run in; also anchors the venv PATH filter
    workdir: PathBuf,
    /// Optional shell initializer sourced before the user command
    shell_init: Option<PathBuf>,
}

impl WorkTree {
    /// `tasks_root` must be absolute: scripts embed these paths verbatim so
    /// sessions stay independent of the daemon's cwd.
    pub fn new(tasks_root: PathBuf, workdir: PathBuf, shell_init: Option<PathBuf>) -> Self {
        Self {
            tasks_root,
            workdir,
            shell_init,
        }
    }

    /// Locations for a task id without touching the filesystem
    pub fn paths(&self, task_id: i64) -> TaskPaths {
        TaskPaths::under(self.tasks_root.join(format!("task_{}", task_id)))
    }

    /// Create the task directory and write the executable script pair
    ///
    /// Work trees are never re-used; the directory lives for the task's life.
    pub async fn materialize(
        &self,
        task_id: i64,
        command: &str,
        assigned_gpus: &[u32],
    ) -> GpuqResult<TaskPaths> {
        let paths = self.paths(task_id);
        tokio::fs::create_dir_all(&paths.dir).await?;

        tokio::fs::write(
            &paths.command_script,
            render_command_script(task_id, command),
        )
        .await?;
        tokio::fs::write(
            &paths.run_script,
            render_run_script(
                task_id,
                &paths,
                assigned_gpus,
                &self.workdir,
                self.shell_init.as_deref(),
            ),
        )
        .await?;

        set_executable(&paths.command_script).await?;
        set_executable(&paths.run_script).await?;

        // Pre-create the log so tail reads before first output succeed
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.log_file)
            .await?;

        debug!(task_id, dir = %paths.dir.display(), "Materialized work tree");
        Ok(paths)
    }

    /// Read the recorded exit status, if any
    ///
    /// Missing file, empty file, and unparseable first lines all mean "no
    /// exit code was recorded".
    pub async fn read_exit_code(paths: &TaskPaths) -> Option<i64> {
        let content = match tokio::fs::read_to_string(&paths.exit_code_file).await {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %paths.exit_code_file.display(), error = %e, "Failed to read exit code file");
                }
                return None;
            }
        };
        content.lines().next()?.trim().parse::<i64>().ok()
    }
}

fn render_command_script(task_id: i64, command: &str) -> String {
    // The user command goes in verbatim: no escaping, no rewriting. The
    // frame prints enough environment to debug "works in my shell" reports.
    format!(
        r#"#!/usr/bin/env bash
echo "=== task_{task_id}: command starting at $(date -u '+%Y-%m-%dT%H:%M:%SZ') ==="
echo "PATH=${{PATH}}"
echo "python: $(command -v python || echo 'not found')"
echo "conda: $(command -v conda || echo 'not found')"
{command}
__gpuq_rc=$?
echo "=== task_{task_id}: command exited with status ${{__gpuq_rc}} ==="
exit "${{__gpuq_rc}}"
"#
    )
}

fn render_run_script(
    task_id: i64,
    paths: &TaskPaths,
    assigned_gpus: &[u32],
    workdir: &Path,
    shell_init: Option<&Path>,
) -> String {
    let mut script = String::new();
    script.push_str("#!/usr/bin/env bash\n");
    script.push_str("set -uo pipefail\n\n");

    // Rebuild PATH without any in-tree virtualenv bin so `conda activate`
    // inside the command resolves the user's own environment. The filter runs
    // through the system interpreter instead of textual surgery on $PATH.
    script.push_str(&format!(
        r#"PATH="$(python3 - <<'GPUQ_PATH_FILTER'
import os

root = r"{workdir}"
entries = os.environ.get("PATH", "").split(os.pathsep)

def in_tree_venv(entry):
    if not entry.startswith(root):
        return False
    parts = entry.split(os.sep)
    return "venv" in parts or ".venv" in parts

print(os.pathsep.join(e for e in entries if not in_tree_venv(e)))
GPUQ_PATH_FILTER
)"
export PATH
"#,
        workdir = workdir.display()
    ));

    script.push_str("export PYTHONUNBUFFERED=1\n");
    script.push_str(&format!(
        "GPUQ_TASK_LOG=\"{}\"\nexport GPUQ_TASK_LOG\n\n",
        paths.log_file.display()
    ));

    script.push_str(&format!(
        r#"{{
    echo "=== task_{task_id}: session started at $(date -u '+%Y-%m-%dT%H:%M:%SZ') ==="
    echo "PATH=${{PATH}}"
    echo "python3: $(command -v python3 || echo 'not found')"
}} >> "${{GPUQ_TASK_LOG}}"
"#
    ));

    if !assigned_gpus.is_empty() {
        script.push_str(&format!(
            "export CUDA_VISIBLE_DEVICES=\"{}\"\n",
            join_gpu_indices(assigned_gpus)
        ));
    }
    script.push_str(&format!("cd \"{}\"\n", workdir.display()));
    if let Some(init) = shell_init {
        script.push_str(&format!("source \"{}\"\n", init.display()));
    }

    script.push_str(&format!(
        "bash \"{}\" 2>&1 | tee -a \"${{GPUQ_TASK_LOG}}\"\n",
        paths.command_script.display()
    ));
    // tee exits 0; PIPESTATUS keeps the command's own status
    script.push_str("__gpuq_rc=${PIPESTATUS[0]}\n");
    script.push_str(&format!(
        "echo \"${{__gpuq_rc}}\" > \"{}\"\n",
        paths.exit_code_file.display()
    ));
    script.push_str("exit \"${__gpuq_rc}\"\n");
    script
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> GpuqResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750))
        .await
        .map_err(GpuqError::Io)
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> GpuqResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn work_tree(tmp: &TempDir, shell_init: Option<PathBuf>) -> WorkTree {
        WorkTree::new(
            tmp.path().join("tasks"),
            tmp.path().to_path_buf(),
            shell_init,
        )
    }

    #[tokio::test]
    async fn test_materialize_writes_script_pair() {
        let tmp = TempDir::new().unwrap();
        let tree = work_tree(&tmp, None);

        let paths = tree
            .materialize(7, "python train.py --epochs 10", &[0, 1])
            .await
            .unwrap();

        assert!(paths.command_script.is_file());
        assert!(paths.run_script.is_file());
        assert!(paths.log_file.is_file());
        assert!(!paths.exit_code_file.exists());

        let command = std::fs::read_to_string(&paths.command_script).unwrap();
        assert!(command.contains("python train.py --epochs 10"));
        assert!(command.contains("command -v python"));
        assert!(command.contains("command -v conda"));
        assert!(command.contains("exit \"${__gpuq_rc}\""));

        let run = std::fs::read_to_string(&paths.run_script).unwrap();
        assert!(run.contains("set -uo pipefail"));
        assert!(run.contains("export PYTHONUNBUFFERED=1"));
        assert!(run.contains("export CUDA_VISIBLE_DEVICES=\"0,1\""));
        assert!(run.contains("${PIPESTATUS[0]}"));
        assert!(run.contains(&paths.exit_code_file.display().to_string()));
        assert!(run.contains(&paths.log_file.display().to_string()));
    }

    #[tokio::test]
    async fn test_command_survives_verbatim() {
        let tmp = TempDir::new().unwrap();
        let tree = work_tree(&tmp, None);

        let command = "for i in 1 2 3; do\n  echo \"run $i\"\ndone";
        let paths = tree.materialize(1, command, &[0]).await.unwrap();
        let content = std::fs::read_to_string(&paths.command_script).unwrap();
        assert!(content.contains(command));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let tree = work_tree(&tmp, None);
        let paths = tree.materialize(2, "true", &[0]).await.unwrap();

        for script in [&paths.command_script, &paths.run_script] {
            let mode = std::fs::metadata(script).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o750);
        }
    }

    #[tokio::test]
    async fn test_shell_init_sourced_before_command() {
        let tmp = TempDir::new().unwrap();
        let init = tmp.path().join("conda_init.sh");
        std::fs::write(&init, "true\n").unwrap();

        let tree = work_tree(&tmp, Some(init.clone()));
        let paths = tree.materialize(3, "conda activate ml", &[0]).await.unwrap();

        let run = std::fs::read_to_string(&paths.run_script).unwrap();
        let source_pos = run.find(&format!("source \"{}\"", init.display())).unwrap();
        let command_pos = run
            .find(&paths.command_script.display().to_string())
            .unwrap();
        assert!(source_pos < command_pos);
    }

    #[tokio::test]
    async fn test_read_exit_code() {
        let tmp = TempDir::new().unwrap();
        let tree = work_tree(&tmp, None);
        let paths = tree.materialize(4, "true", &[0]).await.unwrap();

        assert_eq!(WorkTree::read_exit_code(&paths).await, None);

        std::fs::write(&paths.exit_code_file, "0\n").unwrap();
        assert_eq!(WorkTree::read_exit_code(&paths).await, Some(0));

        std::fs::write(&paths.exit_code_file, "3\n").unwrap();
        assert_eq!(WorkTree::read_exit_code(&paths).await, Some(3));

        std::fs::write(&paths.exit_code_file, "not a number\n").unwrap();
        assert_eq!(WorkTree::read_exit_code(&paths).await, None);

        std::fs::write(&paths.exit_code_file, "").unwrap();
        assert_eq!(WorkTree::read_exit_code(&paths).await, None);
    }
}
