//! Editor-launch endpoint.
//!
//! Tooling posts a stack frame (`{"file": ..., "lineNumber": ...}`) and the
//! server opens that location in the developer's editor. The reply is always
//! a plain `OK` once the body parses; launch failures are only logged.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Environment variables consulted, in order, when no editor is configured.
const EDITOR_ENV_VARS: &[&str] = &["REACT_EDITOR", "VISUAL", "EDITOR"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub file: String,
    pub line_number: u32,
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("no editor configured; set REACT_EDITOR or EDITOR")]
    NoEditor,
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("editor launches need a Tokio runtime")]
    NoRuntime,
    #[error("failed to launch editor `{editor}`: {source}")]
    Spawn {
        editor: String,
        #[source]
        source: std::io::Error,
    },
}

/// Opens a file at a line in some editor.
pub trait EditorLauncher: Send + Sync + 'static {
    fn open(&self, file: &Path, line: u32, watch_folders: &[PathBuf]) -> Result<(), EditorError>;
}

/// Launches the editor as a child process. The child is awaited on a
/// background task so it is reaped when it exits.
#[derive(Debug, Clone, Default)]
pub struct ProcessEditorLauncher {
    editor: Option<String>,
}

impl ProcessEditorLauncher {
    /// `editor` overrides the environment; it may carry extra arguments
    /// (e.g. `"code --reuse-window"`).
    pub fn new(editor: Option<String>) -> Self {
        Self { editor }
    }

    fn resolve_editor(&self) -> Option<String> {
        self.editor
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| {
                EDITOR_ENV_VARS
                    .iter()
                    .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            })
    }
}

impl EditorLauncher for ProcessEditorLauncher {
    fn open(&self, file: &Path, line: u32, watch_folders: &[PathBuf]) -> Result<(), EditorError> {
        if !file.exists() {
            return Err(EditorError::FileNotFound(file.to_path_buf()));
        }

        let command = self.resolve_editor().ok_or(EditorError::NoEditor)?;
        let mut words = command.split_whitespace();
        let program = words.next().ok_or(EditorError::NoEditor)?;

        let workspace = watch_folders.iter().find(|dir| file.starts_with(dir));
        let args = editor_arguments(program, file, line, workspace.map(PathBuf::as_path));

        let runtime = Handle::try_current().map_err(|_| EditorError::NoRuntime)?;

        info!(editor = program, file = %file.display(), line, "Opening file in editor");
        let mut child = Command::new(program)
            .args(words)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| EditorError::Spawn {
                editor: program.to_string(),
                source,
            })?;

        let editor = program.to_string();
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(editor = %editor, %status, "Editor process exited"),
                Err(e) => warn!(editor = %editor, "Failed to wait for editor process: {e}"),
            }
        });
        Ok(())
    }
}

/// Build the arguments that make `program` jump to `file:line`.
pub fn editor_arguments(
    program: &str,
    file: &Path,
    line: u32,
    workspace: Option<&Path>,
) -> Vec<OsString> {
    let name = Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program)
        .to_ascii_lowercase();

    let path = || file.as_os_str().to_owned();
    let location = || {
        let mut location = path();
        location.push(format!(":{line}"));
        location
    };

    match name.as_str() {
        "vim" | "vi" | "nvim" | "gvim" | "mvim" | "emacs" | "emacsclient" | "nano" | "joe" => {
            vec![format!("+{line}").into(), path()]
        }
        "subl" | "sublime" | "atom" | "zed" => vec![location()],
        "code" | "code-insiders" | "codium" | "cursor" => {
            let mut args = Vec::with_capacity(3);
            if let Some(workspace) = workspace {
                args.push(workspace.as_os_str().to_owned());
            }
            args.push("-g".into());
            args.push(location());
            args
        }
        "idea" | "webstorm" | "phpstorm" | "pycharm" | "goland" | "rubymine" | "clion"
        | "rider" | "studio" => vec!["--line".into(), line.to_string().into(), path()],
        _ => vec![path()],
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct EditorState {
    launcher: Arc<dyn EditorLauncher>,
    watch_folders: Arc<[PathBuf]>,
}

/// Routes for the editor-launch endpoint at `path`.
pub fn router(path: &str, launcher: Arc<dyn EditorLauncher>, watch_folders: Vec<PathBuf>) -> Router {
    Router::new()
        .route(path, post(open_stack_frame_handler))
        .with_state(EditorState {
            launcher,
            watch_folders: watch_folders.into(),
        })
}

async fn open_stack_frame_handler(State(state): State<EditorState>, body: String) -> Response {
    let frame: StackFrame = match serde_json::from_str(&body) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Rejected stack frame: {e}");
            return (StatusCode::BAD_REQUEST, format!("Invalid stack frame: {e}")).into_response();
        }
    };

    if let Err(e) = state
        .launcher
        .open(Path::new(&frame.file), frame.line_number, &state.watch_folders)
    {
        warn!(file = %frame.file, line = frame.line_number, "Could not open editor: {e}");
    }

    "OK".into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    fn args(program: &str, workspace: Option<&Path>) -> Vec<String> {
        editor_arguments(program, Path::new("/src/app/App.js"), 42, workspace)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn terminal_editors_use_plus_line() {
        assert_eq!(args("vim", None), ["+42", "/src/app/App.js"]);
        assert_eq!(args("/usr/local/bin/nvim", None), ["+42", "/src/app/App.js"]);
        assert_eq!(args("emacsclient", None), ["+42", "/src/app/App.js"]);
    }

    #[test]
    fn gui_editors_use_colon_line() {
        assert_eq!(args("subl", None), ["/src/app/App.js:42"]);
        assert_eq!(args("zed", None), ["/src/app/App.js:42"]);
    }

    #[test]
    fn vscode_family_uses_goto_with_workspace() {
        assert_eq!(args("code", None), ["-g", "/src/app/App.js:42"]);
        assert_eq!(
            args("code", Some(Path::new("/src/app"))),
            ["/src/app", "-g", "/src/app/App.js:42"]
        );
        assert_eq!(args("Cursor", None), ["-g", "/src/app/App.js:42"]);
    }

    #[test]
    fn jetbrains_uses_line_flag() {
        assert_eq!(args("webstorm", None), ["--line", "42", "/src/app/App.js"]);
    }

    #[test]
    fn unknown_editor_gets_file_only() {
        assert_eq!(args("notepad", None), ["/src/app/App.js"]);
    }

    #[test]
    fn missing_file_is_reported_before_editor_lookup() {
        let launcher = ProcessEditorLauncher::new(Some("vim".into()));
        let err = launcher
            .open(Path::new("/definitely/not/here.js"), 1, &[])
            .unwrap_err();
        assert!(matches!(err, EditorError::FileNotFound(_)));
    }

    #[test]
    fn launching_outside_a_runtime_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let launcher = ProcessEditorLauncher::new(Some("true".into()));
        let err = launcher.open(file.path(), 1, &[]).unwrap_err();
        assert!(matches!(err, EditorError::NoRuntime));
    }

    /// Child processes of this test binary, as `(pid, state)` from `/proc`.
    #[cfg(target_os = "linux")]
    fn child_processes() -> Vec<(u32, char)> {
        let me = std::process::id();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| {
                let pid: u32 = entry.ok()?.file_name().to_str()?.parse().ok()?;
                let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
                // `pid (comm) state ppid ...`; comm may itself contain spaces or parens.
                let mut rest = stat.get(stat.rfind(')')? + 1..)?.split_whitespace();
                let state = rest.next()?.chars().next()?;
                let ppid: u32 = rest.next()?.parse().ok()?;
                (ppid == me).then_some((pid, state))
            })
            .collect()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn exited_editors_are_reaped() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let launcher = ProcessEditorLauncher::new(Some("true".into()));
        for line in 1..=3 {
            launcher.open(file.path(), line, &[]).unwrap();
        }

        let mut remaining = child_processes();
        for _ in 0..100 {
            if remaining.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            remaining = child_processes();
        }
        assert!(remaining.is_empty(), "editor children left behind: {remaining:?}");
    }

    #[tokio::test]
    async fn unlaunchable_editor_reports_spawn_failure() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let launcher = ProcessEditorLauncher::new(Some("devrelay-no-such-editor --wait".into()));
        let err = launcher.open(file.path(), 3, &[]).unwrap_err();
        assert!(
            matches!(err, EditorError::Spawn { ref editor, .. } if editor == "devrelay-no-such-editor")
        );
    }

    #[test]
    fn explicit_editor_wins_over_environment() {
        let launcher = ProcessEditorLauncher::new(Some("code --wait".into()));
        assert_eq!(launcher.resolve_editor().as_deref(), Some("code --wait"));
    }

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(PathBuf, u32, Vec<PathBuf>)>>,
    }

    impl EditorLauncher for Arc<Recording> {
        fn open(&self, file: &Path, line: u32, watch_folders: &[PathBuf]) -> Result<(), EditorError> {
            self.calls
                .lock()
                .push((file.to_path_buf(), line, watch_folders.to_vec()));
            Err(EditorError::NoEditor)
        }
    }

    async fn post_frame(app: Router, body: &'static str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::post("/open-stack-frame")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn endpoint_invokes_launcher_and_acknowledges() {
        let recording = Arc::new(Recording::default());
        let app = router(
            "/open-stack-frame",
            Arc::new(recording.clone()),
            vec![PathBuf::from("/src")],
        );

        let (status, body) = post_frame(app, r#"{"file":"/src/App.js","lineNumber":7}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let calls = recording.calls.lock();
        assert_eq!(
            calls.as_slice(),
            [(PathBuf::from("/src/App.js"), 7, vec![PathBuf::from("/src")])]
        );
    }

    #[tokio::test]
    async fn endpoint_rejects_malformed_frame() {
        let recording = Arc::new(Recording::default());
        let app = router("/open-stack-frame", Arc::new(recording.clone()), Vec::new());

        let (status, _) = post_frame(app, r#"{"file":"/src/App.js"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(recording.calls.lock().is_empty());
    }
}
