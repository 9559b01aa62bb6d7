//! The ordered record of exchanged messages.
//!
//! A [`Conversation`] only ever grows at the end.  It is the unit handed to the client on every
//! turn and the unit written to and read from transcript files.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Message;

/// Directory beneath the home directory that holds default transcripts.
pub const TRANSCRIPT_DIR: &str = ".ollama_logs";

/// An append-only sequence of messages in turn order.
///
/// Serializes as a bare JSON array of `{role, content}` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `message` to the end of the conversation.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The messages in turn order.
    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    /// The number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if no message has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recently appended message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Write the conversation to `path` as pretty-printed JSON, replacing any existing file.
    ///
    /// The JSON is written to a sibling temporary file that is then renamed over `path`, so a
    /// failed save leaves the previous transcript intact.  Saving the same conversation twice
    /// produces byte-identical files.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut contents = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut contents, formatter);
        self.serialize(&mut serializer).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })?;
        contents.push(b'\n');

        let staging = staging_path(path)?;
        let written = write_synced(&staging, &contents).and_then(|()| fs::rename(&staging, path));
        if let Err(err) = written {
            let _ = fs::remove_file(&staging);
            return Err(Error::io(
                format!("failed to write transcript file {}", path.display()),
                err,
            ));
        }
        debug!(path = %path.display(), messages = self.len(), "saved transcript");
        Ok(())
    }

    /// Read a conversation previously written by [`Conversation::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            Error::io(
                format!("failed to open transcript file {}", path.display()),
                err,
            )
        })?;
        let conversation: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| {
                if err.is_io() {
                    Error::io(
                        format!("failed to read transcript file {}", path.display()),
                        err.into(),
                    )
                } else {
                    Error::decode(
                        format!("{} is not a valid transcript: {err}", path.display()),
                        None,
                        Some(Box::new(err)),
                    )
                }
            })?;
        debug!(path = %path.display(), messages = conversation.len(), "loaded transcript");
        Ok(conversation)
    }

    /// Like [`Conversation::load`], but a missing file yields an empty conversation.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load(path.as_ref()) {
            Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(Self::new())
            }
            result => result,
        }
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// The temporary file a save to `path` is staged in before it replaces `path`.
fn staging_path(path: &Path) -> Result<PathBuf> {
    let Some(name) = path.file_name() else {
        return Err(Error::io(
            format!("{} does not name a transcript file", path.display()),
            io::Error::new(ErrorKind::InvalidInput, "path has no file name"),
        ));
    };
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(".tmp");
    Ok(path.with_file_name(staged))
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// The transcript file used for `model` when none is named explicitly.
pub fn default_transcript_path(home: &Path, model: &str) -> PathBuf {
    let safe_model = model.replace(['/', ':'], "_");
    home.join(TRANSCRIPT_DIR)
        .join(format!("{safe_model}_conversation_log.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn sample() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.append(Message::system("Be brief."));
        conversation.append(Message::user("hi"));
        conversation.append(Message::assistant("Hello"));
        conversation
    }

    #[test]
    fn append_preserves_order() {
        let mut conversation = sample();
        let before = conversation.history().to_vec();
        let message = Message::user("hi");
        conversation.append(message.clone());

        assert_eq!(conversation.len(), before.len() + 1);
        assert_eq!(&conversation.history()[..before.len()], &before[..]);
        assert_eq!(conversation.last(), Some(&message));
    }

    #[test]
    fn duplicates_are_allowed() {
        let mut conversation = Conversation::new();
        conversation.append(Message::user("again"));
        conversation.append(Message::user("again"));
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn serializes_as_plain_array() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "Hello"},
            ])
        );
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        let conversation = sample();

        conversation.save(&path).unwrap();
        let loaded = Conversation::load(&path).unwrap();
        assert_eq!(loaded, conversation);
        assert_eq!(loaded.history()[2].role, Role::Assistant);
    }

    #[test]
    fn save_is_idempotent_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        std::fs::write(&path, "a much longer file that should be replaced entirely").unwrap();

        let conversation = sample();
        conversation.save(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        conversation.save(&path).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with("[\n    {\n        \"role\": \"system\""));
        assert!(text.ends_with("]\n"));
    }

    #[test]
    fn load_reports_io_and_decode_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(Conversation::load(&missing).unwrap_err().is_io());

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{\"role\": \"user\"").unwrap();
        assert!(Conversation::load(&garbage).unwrap_err().is_decode());

        let bad_role = dir.path().join("bad_role.json");
        std::fs::write(&bad_role, r#"[{"role": "robot", "content": "beep"}]"#).unwrap();
        assert!(Conversation::load(&bad_role).unwrap_err().is_decode());
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(Conversation::load_or_default(&missing).unwrap().is_empty());

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "not json").unwrap();
        assert!(Conversation::load_or_default(&garbage).is_err());
    }

    #[test]
    fn failed_save_is_io_and_keeps_previous_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        let previous = Conversation::from(vec![Message::user("keep me")]);
        previous.save(&path).unwrap();

        // A directory squatting on the staging name makes the write fail.
        std::fs::create_dir(dir.path().join(".transcript.json.tmp")).unwrap();
        let mut longer = sample();
        longer.append(Message::user("x".repeat(20 * 1024)));
        let err = longer.save(&path).unwrap_err();
        assert!(err.is_io(), "{err}");
        assert_eq!(Conversation::load(&path).unwrap(), previous);
    }

    #[test]
    fn save_leaves_no_staging_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        sample().save(&path).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("transcript.json")]);
    }

    #[test]
    fn save_under_a_regular_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let err = sample().save(blocker.join("transcript.json")).unwrap_err();
        assert!(err.is_io(), "{err}");
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/transcript.json");
        assert!(sample().save(path).unwrap_err().is_io());
    }

    #[test]
    fn default_path_sanitizes_model() {
        let path = default_transcript_path(Path::new("/home/me"), "library/llama2:13b");
        assert_eq!(
            path,
            PathBuf::from("/home/me/.ollama_logs/library_llama2_13b_conversation_log.json")
        );
    }
}
