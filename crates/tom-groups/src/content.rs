//! Message contents carried inside envelopes.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{self, SymmetricKey};
use crate::error::TomGroupError;
use crate::group::{Bulletin, GroupCommand, GroupId, GroupMeta};
use crate::message::ReliableMessage;

/// Content of an `InstantMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Content {
    Text { text: String },
    File(FileContent),
    Command(GroupCommand),
    /// Group meta + bulletin, so receivers can verify the document.
    Document { meta: GroupMeta, bulletin: Bulletin },
    /// Signed envelopes relayed as-is (group history, bot fan-out).
    Forward { messages: Vec<ReliableMessage> },
    Receipt(ReceiptContent),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// The group command inside, if any.
    pub fn as_command(&self) -> Option<&GroupCommand> {
        match self {
            Content::Command(cmd) => Some(cmd),
            _ => None,
        }
    }
}

/// File payload.
///
/// When `password` is set, `data` is sealed under it and `nonce` is the
/// matching nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    pub filename: String,
    pub data: Vec<u8>,
    #[serde(default)]
    pub nonce: Option<[u8; 24]>,
    #[serde(default)]
    pub password: Option<SymmetricKey>,
}

impl FileContent {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
            nonce: None,
            password: None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.password.is_some()
    }

    /// Seal `data` under `key`. No-op if already sealed.
    pub fn encrypt(&self, key: &SymmetricKey) -> Result<Self, TomGroupError> {
        if self.is_encrypted() {
            return Ok(self.clone());
        }
        let (data, nonce) = crypto::seal(&self.data, key)?;
        Ok(Self {
            filename: self.filename.clone(),
            data,
            nonce: Some(nonce),
            password: Some(*key),
        })
    }

    /// Plain file bytes.
    pub fn plaintext(&self) -> Result<Vec<u8>, TomGroupError> {
        match (&self.password, &self.nonce) {
            (Some(key), Some(nonce)) => crypto::open(&self.data, nonce, key),
            (None, _) => Ok(self.data.clone()),
            (Some(_), None) => Err(TomGroupError::Crypto("file nonce missing".into())),
        }
    }
}

/// Human-readable response to a command.
///
/// `template` uses `${KEY}` placeholders filled from `replacements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptContent {
    pub text: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,
    #[serde(default)]
    pub group: Option<GroupId>,
    /// Id of the envelope this receipt answers.
    #[serde(default)]
    pub original: Option<String>,
}

impl ReceiptContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            template: None,
            replacements: BTreeMap::new(),
            group: None,
            original: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn replace(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.replacements.insert(key.into(), value.into());
        self
    }

    pub fn for_group(mut self, group: &GroupId) -> Self {
        self.group = Some(group.clone());
        self
    }

    pub fn answering(mut self, envelope_id: impl Into<String>) -> Self {
        self.original = Some(envelope_id.into());
        self
    }

    /// Fill the template; falls back to `text` when there is none.
    pub fn render(&self) -> String {
        let Some(template) = &self.template else {
            return self.text.clone();
        };
        self.replacements
            .iter()
            .fold(template.clone(), |acc, (key, value)| {
                acc.replace(&format!("${{{key}}}"), value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_renders_template() {
        let receipt = ReceiptContent::new("Group empty.")
            .with_template("Group empty: ${ID}")
            .replace("ID", "grp-1");
        assert_eq!(receipt.render(), "Group empty: grp-1");
    }

    #[test]
    fn receipt_without_template_uses_text() {
        assert_eq!(ReceiptContent::new("ok").render(), "ok");
    }

    #[test]
    fn receipt_json_shape() {
        let receipt = ReceiptContent::new("Group empty.")
            .with_template("Group empty: ${ID}")
            .replace("ID", "grp-1");
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["template"], "Group empty: ${ID}");
        assert_eq!(value["replacements"]["ID"], "grp-1");
    }

    #[test]
    fn file_encrypt_then_plaintext() {
        let key = crypto::generate_symmetric_key();
        let file = FileContent::new("a.txt", b"hello".to_vec());
        let sealed = file.encrypt(&key).unwrap();
        assert!(sealed.is_encrypted());
        assert_ne!(sealed.data, b"hello");
        assert_eq!(sealed.plaintext().unwrap(), b"hello");
    }

    #[test]
    fn file_encrypt_is_idempotent() {
        let key = crypto::generate_symmetric_key();
        let sealed = FileContent::new("a", vec![1, 2, 3]).encrypt(&key).unwrap();
        let again = sealed.encrypt(&crypto::generate_symmetric_key()).unwrap();
        assert_eq!(sealed, again);
    }
}
