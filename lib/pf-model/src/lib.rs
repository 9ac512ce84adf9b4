// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The model/view layer sitting on top of [`pf_storage`]: a JSON-backed
//! record collection with a small CRUD surface, and a `{{key}}`-placeholder
//! view renderer.
//!
//! Grounded on `examples/original_source/framework/include/FrameworkModel.h`
//! and `FrameworkView.h`: `load`/`save`/`all`/`find`/`create`/`update`/
//! `remove`/`*AsJson` and a default `getIdField()` of `"id"` for the model;
//! `render()`'s double-brace placeholder syntax for the view.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use pf_storage::Storage;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    Storage(pf_storage::Error),
    /// The stored collection file wasn't a JSON array, or a record wasn't
    /// a JSON object.
    Malformed,
    /// `toJson`/`fromJson` on text that isn't valid JSON at all.
    InvalidJson,
    NotFound,
}

impl From<pf_storage::Error> for Error {
    fn from(e: pf_storage::Error) -> Self {
        Error::Storage(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::InvalidJson
    }
}

/// A JSON-array-of-objects collection persisted at `path`, keyed by
/// `id_field` (default `"id"`, per `FrameworkModel::getIdField`).
///
/// Mirrors the original's pattern of one model instance per resource type,
/// each wrapping the same storage back-end with a different file and id
/// field, rather than one model class per table with compile-time schema.
pub struct JsonModel<'s, S: Storage> {
    storage: &'s mut S,
    path: String,
    id_field: String,
    records: Vec<Value>,
    loaded: bool,
}

impl<'s, S: Storage> JsonModel<'s, S> {
    pub fn new(storage: &'s mut S, path: &str) -> Self {
        JsonModel {
            storage,
            path: path.to_string(),
            id_field: String::from("id"),
            records: Vec::new(),
            loaded: false,
        }
    }

    pub fn with_id_field(mut self, field: &str) -> Self {
        self.id_field = field.to_string();
        self
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Reads `path` and parses it as a JSON array, replacing the in-memory
    /// set. A missing file is treated as an empty collection rather than an
    /// error, so a fresh model can be used without a separate "create if
    /// absent" step.
    pub fn load(&mut self) -> Result<(), Error> {
        let bytes = match self.storage.read_file(&self.path) {
            Ok(b) => b,
            Err(pf_storage::Error::NotFound) => {
                self.records = Vec::new();
                self.loaded = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let text = core::str::from_utf8(&bytes).map_err(|_| Error::Malformed)?;
        let value: Value = serde_json::from_str(text)?;
        self.records = value.as_array().cloned().ok_or(Error::Malformed)?;
        self.loaded = true;
        Ok(())
    }

    fn ensure_loaded(&mut self) -> Result<(), Error> {
        if !self.loaded {
            self.load()?;
        }
        Ok(())
    }

    /// Writes the whole in-memory collection back to `path` as a JSON
    /// array (`FrameworkModel::saveAll`).
    pub fn save_all(&mut self) -> Result<(), Error> {
        let value = Value::Array(self.records.clone());
        let text = serde_json::to_string(&value)?;
        self.storage.write_file(&self.path, text.as_bytes())?;
        Ok(())
    }

    pub fn all(&mut self) -> Result<&[Value], Error> {
        self.ensure_loaded()?;
        Ok(&self.records)
    }

    fn id_of(&self, record: &Value) -> Option<String> {
        record.get(&self.id_field).map(value_as_plain_string)
    }

    pub fn find(&mut self, id: &str) -> Result<Option<&Value>, Error> {
        self.ensure_loaded()?;
        Ok(self
            .records
            .iter()
            .find(|r| self.id_of(r).as_deref() == Some(id)))
    }

    pub fn find_as_json(&mut self, id: &str) -> Result<Option<String>, Error> {
        let text = match self.find(id)? {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        Ok(text)
    }

    /// Inserts `record`, assigning it the next sequential id (as a string)
    /// if it doesn't already carry one under `id_field`, then persists the
    /// whole collection.
    pub fn create(&mut self, mut record: Value) -> Result<Value, Error> {
        self.ensure_loaded()?;
        if !record.is_object() {
            return Err(Error::Malformed);
        }
        if self.id_of(&record).is_none() {
            let next_id = self.records.len().to_string();
            record
                .as_object_mut()
                .expect("checked is_object above")
                .insert(self.id_field.clone(), Value::String(next_id));
        }
        self.records.push(record.clone());
        self.save_all()?;
        Ok(record)
    }

    pub fn create_from_json(&mut self, json_text: &str) -> Result<String, Error> {
        let record: Value = serde_json::from_str(json_text)?;
        let created = self.create(record)?;
        Ok(serde_json::to_string(&created)?)
    }

    /// Merges each field of `patch` into the matching record, leaving
    /// fields `patch` doesn't mention untouched.
    pub fn update(&mut self, id: &str, patch: Value) -> Result<Value, Error> {
        self.ensure_loaded()?;
        let patch_obj = patch.as_object().ok_or(Error::Malformed)?;
        let id_field = self.id_field.clone();
        let record = self
            .records
            .iter_mut()
            .find(|r| r.get(&id_field).map(value_as_plain_string).as_deref() == Some(id))
            .ok_or(Error::NotFound)?;
        let obj = record.as_object_mut().ok_or(Error::Malformed)?;
        for (k, v) in patch_obj.iter() {
            obj.insert(k.clone(), v.clone());
        }
        let updated = record.clone();
        self.save_all()?;
        Ok(updated)
    }

    pub fn update_from_json(&mut self, id: &str, json_text: &str) -> Result<String, Error> {
        let patch: Value = serde_json::from_str(json_text)?;
        let updated = self.update(id, patch)?;
        Ok(serde_json::to_string(&updated)?)
    }

    pub fn remove(&mut self, id: &str) -> Result<(), Error> {
        self.ensure_loaded()?;
        let id_field = self.id_field.clone();
        let before = self.records.len();
        self.records
            .retain(|r| r.get(&id_field).map(value_as_plain_string).as_deref() != Some(id));
        if self.records.len() == before {
            return Err(Error::NotFound);
        }
        self.save_all()
    }

    /// Removes the record and returns a small JSON confirmation body, for
    /// handlers that want something to hand straight to `Response::json`.
    pub fn delete_as_json(&mut self, id: &str) -> Result<String, Error> {
        self.remove(id)?;
        Ok(alloc::format!("{{\"deleted\":\"{id}\"}}"))
    }
}

/// Renders a string-keyed value the way `getIdField`/query params naturally
/// arrive: strings render bare, everything else falls back to its JSON
/// text form.
fn value_as_plain_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Something that can render itself against a string context, with an
/// associated `Content-Type` for the response that serves it.
pub trait View {
    fn render(&self, ctx: &BTreeMap<String, String>) -> String;
    fn content_type(&self) -> &str {
        "text/html"
    }
}

/// A template with `{{key}}` placeholders, substituted from a context map
/// at render time. Matches `FrameworkView::render`'s double-brace syntax.
/// A placeholder whose key is absent from the context is left in the
/// output verbatim, so a missing binding is visible rather than silently
/// erased.
pub struct TemplateView {
    template: String,
    content_type: String,
}

impl TemplateView {
    pub fn new(template: &str) -> Self {
        TemplateView {
            template: template.to_string(),
            content_type: String::from("text/html"),
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }
}

impl View for TemplateView {
    fn render(&self, ctx: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(self.template.len());
        let bytes = self.template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
                if let Some(end) = self.template[i..].find("}}") {
                    let key = self.template[i + 2..i + end].trim();
                    match ctx.get(key) {
                        Some(value) => {
                            out.push_str(value);
                            i += end + 2;
                            continue;
                        }
                        None => {
                            out.push_str(&self.template[i..i + end + 2]);
                            i += end + 2;
                            continue;
                        }
                    }
                }
            }
            let ch = self.template[i..].chars().next().expect("i < len");
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use pf_storage::{Error as StorageError, FileInfo, LineReader};
    use serde_json::json;

    /// A minimal in-memory `Storage` for exercising `JsonModel` without a
    /// real flash or SD back-end.
    struct MemStorage {
        files: RefCell<BTreeMap<String, Vec<u8>>>,
    }

    impl MemStorage {
        fn new() -> Self {
            MemStorage {
                files: RefCell::new(BTreeMap::new()),
            }
        }
    }

    impl Storage for MemStorage {
        fn mount(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
        fn unmount(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
        fn is_mounted(&self) -> bool {
            true
        }
        fn exists(&mut self, path: &str) -> Result<bool, StorageError> {
            Ok(self.files.borrow().contains_key(path))
        }
        fn remove(&mut self, path: &str) -> Result<(), StorageError> {
            self.files.borrow_mut().remove(path).ok_or(StorageError::NotFound)?;
            Ok(())
        }
        fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
            let data = self.files.borrow_mut().remove(from).ok_or(StorageError::NotFound)?;
            self.files.borrow_mut().insert(to.to_string(), data);
            Ok(())
        }
        fn read_file(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
            self.files.borrow().get(path).cloned().ok_or(StorageError::NotFound)
        }
        fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
            self.files.borrow_mut().insert(path.to_string(), data.to_vec());
            Ok(())
        }
        fn append_to_file(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
            self.files.borrow_mut().entry(path.to_string()).or_default().extend_from_slice(data);
            Ok(())
        }
        fn read_file_string(&mut self, path: &str, start: usize, len: usize) -> Result<String, StorageError> {
            let bytes = self.read_file(path)?;
            let end = (start + len).min(bytes.len());
            Ok(String::from_utf8_lossy(&bytes[start.min(end)..end]).into_owned())
        }
        fn stream_file(&mut self, path: &str, chunk_cb: &mut dyn FnMut(&[u8])) -> Result<(), StorageError> {
            let bytes = self.read_file(path)?;
            chunk_cb(&bytes);
            Ok(())
        }
        fn get_file_size(&mut self, path: &str) -> Result<usize, StorageError> {
            Ok(self.read_file(path)?.len())
        }
        fn list_directory(&mut self, _path: &str) -> Result<Vec<FileInfo>, StorageError> {
            Ok(Vec::new())
        }
        fn create_directory(&mut self, _path: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn remove_directory(&mut self, _path: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn format_storage(&mut self) -> Result<(), StorageError> {
            self.files.borrow_mut().clear();
            Ok(())
        }
        fn open_reader(&mut self, _path: &str) -> Result<LineReader, StorageError> {
            Err(StorageError::Unsupported)
        }
    }

    #[test]
    fn missing_file_loads_as_empty_collection() {
        let mut storage = MemStorage::new();
        let mut model = JsonModel::new(&mut storage, "/data/widgets.json");
        assert_eq!(model.all().unwrap().len(), 0);
    }

    #[test]
    fn create_assigns_sequential_id_when_absent() {
        let mut storage = MemStorage::new();
        let mut model = JsonModel::new(&mut storage, "/data/widgets.json");
        let a = model.create(json!({"name": "a"})).unwrap();
        let b = model.create(json!({"name": "b"})).unwrap();
        assert_eq!(a["id"], json!("0"));
        assert_eq!(b["id"], json!("1"));
        assert_eq!(model.all().unwrap().len(), 2);
    }

    #[test]
    fn find_and_update_and_remove_round_trip() {
        let mut storage = MemStorage::new();
        let mut model = JsonModel::new(&mut storage, "/data/widgets.json");
        model.create(json!({"id": "x", "name": "orig"})).unwrap();
        assert_eq!(model.find("x").unwrap().unwrap()["name"], json!("orig"));

        let updated = model.update("x", json!({"name": "new"})).unwrap();
        assert_eq!(updated["name"], json!("new"));

        model.remove("x").unwrap();
        assert!(model.find("x").unwrap().is_none());
        assert_eq!(model.remove("x").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn json_round_trip_helpers() {
        let mut storage = MemStorage::new();
        let mut model = JsonModel::new(&mut storage, "/data/widgets.json");
        let created = model.create_from_json(r#"{"name":"a"}"#).unwrap();
        assert!(created.contains("\"name\":\"a\""));
        let id = model.all().unwrap()[0]["id"].as_str().unwrap().to_string();
        let found = model.find_as_json(&id).unwrap().unwrap();
        assert!(found.contains("\"name\":\"a\""));
        let deleted = model.delete_as_json(&id).unwrap();
        assert!(deleted.contains(&id));
    }

    #[test]
    fn persists_across_instances_sharing_storage() {
        let mut storage = MemStorage::new();
        {
            let mut model = JsonModel::new(&mut storage, "/data/widgets.json");
            model.create(json!({"id": "1", "name": "a"})).unwrap();
        }
        {
            let mut model = JsonModel::new(&mut storage, "/data/widgets.json");
            assert_eq!(model.all().unwrap().len(), 1);
        }
    }

    #[test]
    fn template_substitutes_known_keys_and_preserves_unknown() {
        let view = TemplateView::new("Hello {{name}}, your id is {{missing}}.");
        let mut ctx = BTreeMap::new();
        ctx.insert(String::from("name"), String::from("Ada"));
        assert_eq!(view.render(&ctx), "Hello Ada, your id is {{missing}}.");
        assert_eq!(view.content_type(), "text/html");
    }

    #[test]
    fn template_with_custom_content_type() {
        let view = TemplateView::new("{{greeting}}").with_content_type("text/plain");
        let mut ctx = BTreeMap::new();
        ctx.insert(String::from("greeting"), String::from("hi"));
        assert_eq!(view.render(&ctx), "hi");
        assert_eq!(view.content_type(), "text/plain");
    }
}
