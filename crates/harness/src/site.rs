use overref_core::{
    CanonicalRecord, Cardinality, EntityId, FieldOverrideSettings, ReferenceFieldDefinition,
    ReferenceKind, Tree,
};
use overref_engine::{Engine, EngineError};
use overref_storage::{SqliteStorage, StorageError};
use tempfile::TempDir;

/// Default language of every record the site creates.
pub const LANGCODE: &str = "en";

/// An engine over fresh storage, with shortcuts for the usual fixtures.
pub struct TestSite {
    pub engine: Engine,
    dir: Option<TempDir>,
}

impl TestSite {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            engine: Engine::new(SqliteStorage::open_in_memory()?),
            dir: None,
        })
    }

    /// Site backed by a database file in a temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let storage = SqliteStorage::open(&Self::db_path(&dir)?)?;
        Ok(Self {
            engine: Engine::new(storage),
            dir: Some(dir),
        })
    }

    /// Closes and reopens the database file. In-memory sites start empty.
    pub fn reopen(self) -> Result<Self, Box<dyn std::error::Error>> {
        let Self { engine, dir } = self;
        drop(engine);
        let storage = match &dir {
            Some(dir) => SqliteStorage::open(&Self::db_path(dir)?)?,
            None => SqliteStorage::open_in_memory()?,
        };
        Ok(Self {
            engine: Engine::new(storage),
            dir,
        })
    }

    fn db_path(dir: &TempDir) -> Result<String, Box<dyn std::error::Error>> {
        dir.path()
            .join("site.db")
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| "temporary path is not valid UTF-8".into())
    }

    /// Stores a record of `entity_type`/`bundle` labelled `name`.
    pub fn create_record(
        &mut self,
        entity_type: &str,
        bundle: &str,
        name: &str,
        fields: Vec<(&str, Tree)>,
    ) -> Result<EntityId, EngineError> {
        let mut record = CanonicalRecord::new(entity_type, bundle, LANGCODE)
            .with_field("name", text_items(name));
        for (field, value) in fields {
            record = record.with_field(field, value);
        }
        self.engine.create_record(&record)
    }

    /// Adds an override-capable field pointing at `target_type`, with
    /// `allowed` fields of `target_bundle` overridable.
    pub fn define_override_field(
        &mut self,
        (host_type, host_bundle): (&str, &str),
        field_name: &str,
        (target_type, target_bundle): (&str, &str),
        allowed: &[&str],
    ) -> Result<(), EngineError> {
        let settings = FieldOverrideSettings::new().allow(target_bundle, allowed.iter().copied());
        self.engine.define_reference_field(
            &ReferenceFieldDefinition::new(host_type, host_bundle, field_name, target_type)
                .with_settings(settings),
        )
    }

    /// Adds a plain reference field with no override storage.
    pub fn define_plain_field(
        &mut self,
        (host_type, host_bundle): (&str, &str),
        field_name: &str,
        target_type: &str,
        cardinality: Cardinality,
    ) -> Result<(), EngineError> {
        self.engine.define_reference_field(
            &ReferenceFieldDefinition::new(host_type, host_bundle, field_name, target_type)
                .with_kind(ReferenceKind::Plain)
                .with_cardinality(cardinality),
        )
    }

    /// Points `field_name` of `host_id` at `targets` in the default language.
    pub fn reference(
        &mut self,
        host_id: EntityId,
        field_name: &str,
        targets: &[EntityId],
    ) -> Result<(), EngineError> {
        self.engine.set_references(host_id, LANGCODE, field_name, targets)
    }
}

/// Parses a JSON literal into a value tree.
pub fn tree(raw: &str) -> Result<Tree, overref_core::CoreError> {
    Tree::from_json_str(raw)
}

/// `[{"value": text}]`, the shape of a single-value text field.
pub fn text_items(text: &str) -> Tree {
    Tree::deltas([Tree::branch([("value", Tree::leaf(text))])])
}
