//! Control files.
//!
//! A control file turns writes into commands. Each line of a write is one
//! command: whitespace-separated fields, the first selecting the verb and
//! the rest passed to its handler. Lines run in order, each finishing
//! before the next starts. The first failing line aborts the batch and its
//! error is returned to the writer; lines before it stay applied.
//!
//! A line with no fields ends the batch successfully, even when more lines
//! follow it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use taskfs_core::{Timestamp, CTL_FILE};
use tracing::debug;

use crate::info::FileInfo;
use crate::FsError;

/// Handler for one control verb.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Runs the command with the fields following the verb.
    async fn call(&self, args: &[String]) -> Result<(), FsError>;
}

/// A write-triggered command dispatcher.
pub struct ControlFile {
    info: FileInfo,
    commands: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl ControlFile {
    /// Creates a `ctl` file offering `commands`.
    pub fn new(commands: impl IntoIterator<Item = (&'static str, Arc<dyn CommandHandler>)>) -> Self {
        let now = Timestamp::now();
        Self {
            info: FileInfo::file(CTL_FILE, 0, now, now),
            commands: commands.into_iter().collect(),
        }
    }

    /// Returns the file's metadata.
    pub fn stat(&self) -> &FileInfo {
        &self.info
    }

    /// Returns the verbs this file accepts, sorted.
    pub fn verbs(&self) -> Vec<&'static str> {
        let mut verbs: Vec<_> = self.commands.keys().copied().collect();
        verbs.sort_unstable();
        verbs
    }

    /// Reads are always empty.
    pub fn read_content(&self) -> Bytes {
        Bytes::new()
    }

    /// Runs the commands in `data`.
    pub async fn write_content(&self, data: &[u8]) -> Result<(), FsError> {
        let text = String::from_utf8_lossy(data);
        for line in text.split('\n') {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some((verb, rest)) = fields.split_first() else {
                return Ok(());
            };
            let handler = self
                .commands
                .get(*verb)
                .ok_or_else(|| FsError::UnknownCommand(verb.to_string()))?;
            let args: Vec<String> = rest.iter().map(|s| s.to_string()).collect();
            debug!(verb = *verb, args = args.len(), "Control command");
            handler.call(&args).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn call(&self, args: &[String]) -> Result<(), FsError> {
            self.calls.lock().push(args.to_vec());
            match (self.fail_on, args.first()) {
                (Some(bad), Some(arg)) if arg == bad => {
                    Err(FsError::InvalidCommand("test".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    fn ctl_with(recorder: Arc<Recorder>) -> ControlFile {
        let handler: Arc<dyn CommandHandler> = recorder;
        ControlFile::new([("run", handler)])
    }

    #[tokio::test]
    async fn test_lines_run_in_order() {
        let recorder = Arc::new(Recorder::default());
        let ctl = ctl_with(recorder.clone());

        ctl.write_content(b"run a b\nrun   c\t d\n").await.unwrap();

        let calls = recorder.calls.lock().clone();
        assert_eq!(calls, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[tokio::test]
    async fn test_blank_line_ends_batch() {
        let recorder = Arc::new(Recorder::default());
        let ctl = ctl_with(recorder.clone());

        ctl.write_content(b"run 1\n\nrun 2\n").await.unwrap();
        ctl.write_content(b"   \nrun 3\n").await.unwrap();

        assert_eq!(recorder.calls.lock().clone(), vec![vec!["1"]]);
    }

    #[tokio::test]
    async fn test_unknown_verb_aborts() {
        let recorder = Arc::new(Recorder::default());
        let ctl = ctl_with(recorder.clone());

        let err = ctl.write_content(b"run 1\nbogus\nrun 2\n").await.unwrap_err();
        assert!(matches!(err, FsError::UnknownCommand(ref v) if v == "bogus"));
        assert_eq!(err.to_string(), "unknown control command");
        assert_eq!(recorder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_aborts() {
        let recorder = Arc::new(Recorder {
            fail_on: Some("bad"),
            ..Default::default()
        });
        let ctl = ctl_with(recorder.clone());

        let result = ctl.write_content(b"run ok\nrun bad\nrun never\n").await;
        assert!(matches!(result, Err(FsError::InvalidCommand(_))));
        assert_eq!(recorder.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_write_is_ok() {
        let recorder = Arc::new(Recorder::default());
        let ctl = ctl_with(recorder.clone());

        ctl.write_content(b"").await.unwrap();
        assert!(recorder.calls.lock().is_empty());
        assert!(ctl.read_content().is_empty());
        assert_eq!(ctl.stat().name(), "ctl");
        assert_eq!(ctl.verbs(), vec!["run"]);
    }
}
