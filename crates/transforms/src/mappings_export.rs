//! JSON export of a run's rename tables.

use crate::mapping::MappingTable;
use indexmap::IndexMap;
use jarcloak_utils::errors::ArchiveError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MappingsDocument<'a> {
    classes: IndexMap<&'a str, &'a str>,
    methods: IndexMap<&'a str, &'a IndexMap<String, String>>,
    fields: IndexMap<&'a str, &'a IndexMap<String, String>>,
    local_variables: IndexMap<&'a str, &'a IndexMap<String, IndexMap<String, String>>>,
}

fn non_empty<V>(per_class: &IndexMap<String, IndexMap<String, V>>) -> IndexMap<&str, &IndexMap<String, V>> {
    per_class
        .iter()
        .filter(|(_, inner)| !inner.is_empty())
        .map(|(class, inner)| (class.as_str(), inner))
        .collect()
}

/// Serializes a [`MappingTable`] as the mappings sidecar.
#[derive(Debug, Clone, Copy)]
pub struct MappingsExporter<'a> {
    mappings: &'a MappingTable,
}

impl<'a> MappingsExporter<'a> {
    pub const fn new(mappings: &'a MappingTable) -> Self {
        Self { mappings }
    }

    /// Pretty-printed `{classes, methods, fields, localVariables}`; every section is present
    /// even when empty.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let document = MappingsDocument {
            classes: self.mappings.classes.iter().collect(),
            methods: non_empty(self.mappings.methods()),
            fields: non_empty(self.mappings.fields()),
            local_variables: non_empty(self.mappings.locals()),
        };
        serde_json::to_string_pretty(&document)
    }

    /// Writes [`Self::to_json`] to `path`.
    pub fn export(&self, path: &Path) -> Result<(), ArchiveError> {
        std::fs::write(path, self.to_json()?)?;
        info!("Mappings written to {}", path.display());
        Ok(())
    }

    /// `app.jar` -> `app_mappings.json`; names without a `.jar` suffix get the suffix appended.
    pub fn mappings_path(output: &Path) -> PathBuf {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.strip_suffix(".jar").unwrap_or(&name);
        output.with_file_name(format!("{stem}_mappings.json"))
    }
}
