use rusqlite::{Connection, OptionalExtension};

use overref_core::{
    Cardinality, CanonicalRecord, EntityId, FieldOverrideSettings, FieldSet,
    OverrideMap, ReferenceFieldDefinition, ReferenceKind, Tree,
};

use crate::error::StorageError;
use crate::traits::{ReferenceItem, Storage, StoredReference};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn to_delta(delta: i64) -> Result<u32, StorageError> {
    u32::try_from(delta).map_err(|_| StorageError::Serialization(format!("invalid delta {delta}")))
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn write_translations(
    tx: &rusqlite::Transaction,
    record: &CanonicalRecord,
) -> Result<(), StorageError> {
    for (langcode, fields) in record.translations() {
        tx.execute(
            "INSERT INTO record_translations (entity_id, langcode) VALUES (?1, ?2)",
            rusqlite::params![record.id.as_bytes().as_slice(), langcode],
        )?;
        for (field_name, value) in fields {
            let value_bytes = value
                .to_msgpack()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO record_fields (entity_id, langcode, field_name, value) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.id.as_bytes().as_slice(),
                    langcode,
                    field_name,
                    value_bytes,
                ],
            )?;
        }
    }
    Ok(())
}

fn read_reference(row: &rusqlite::Row) -> rusqlite::Result<(Vec<u8>, String, String, i64, Vec<u8>, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn to_stored_reference(
    (host_bytes, langcode, field_name, delta, target_bytes, override_map): (
        Vec<u8>,
        String,
        String,
        i64,
        Vec<u8>,
        Option<String>,
    ),
) -> Result<StoredReference, StorageError> {
    Ok(StoredReference {
        host_id: EntityId::from_bytes(to_array::<16>(host_bytes, "host_id")?),
        langcode,
        field_name,
        delta: to_delta(delta)?,
        target_id: EntityId::from_bytes(to_array::<16>(target_bytes, "target_id")?),
        override_map,
    })
}

impl Storage for SqliteStorage {
    fn insert_record(&mut self, record: &CanonicalRecord) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        let result = tx.execute(
            "INSERT INTO records (entity_id, entity_type, bundle, default_langcode) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.id.as_bytes().as_slice(),
                record.entity_type,
                record.bundle,
                record.default_langcode,
            ],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StorageError::RecordCollision {
                    entity_id: record.id.to_string(),
                });
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }

        write_translations(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn save_record(&mut self, record: &CanonicalRecord) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO records (entity_id, entity_type, bundle, default_langcode) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_id) DO UPDATE SET entity_type = excluded.entity_type, bundle = excluded.bundle,
                 default_langcode = excluded.default_langcode,
                 changed_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![
                record.id.as_bytes().as_slice(),
                record.entity_type,
                record.bundle,
                record.default_langcode,
            ],
        )?;
        tx.execute(
            "DELETE FROM record_fields WHERE entity_id = ?1",
            rusqlite::params![record.id.as_bytes().as_slice()],
        )?;
        tx.execute(
            "DELETE FROM record_translations WHERE entity_id = ?1",
            rusqlite::params![record.id.as_bytes().as_slice()],
        )?;

        write_translations(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn get_record(&self, entity_id: EntityId) -> Result<Option<CanonicalRecord>, StorageError> {
        let header = self
            .conn
            .query_row(
                "SELECT entity_type, bundle, default_langcode FROM records WHERE entity_id = ?1",
                rusqlite::params![entity_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((entity_type, bundle, default_langcode)) = header else {
            return Ok(None);
        };

        let mut record = CanonicalRecord::with_id(entity_id, entity_type, bundle, default_langcode);

        let mut stmt = self
            .conn
            .prepare("SELECT langcode FROM record_translations WHERE entity_id = ?1")?;
        let langcodes = stmt
            .query_map(rusqlite::params![entity_id.as_bytes().as_slice()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for langcode in langcodes {
            record.replace_translation(langcode, FieldSet::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT langcode, field_name, value FROM record_fields WHERE entity_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![entity_id.as_bytes().as_slice()], |row| {
            let langcode: String = row.get(0)?;
            let field_name: String = row.get(1)?;
            let value_bytes: Vec<u8> = row.get(2)?;
            Ok((langcode, field_name, value_bytes))
        })?;

        for row in rows {
            let (langcode, field_name, value_bytes) = row?;
            let value = Tree::from_msgpack(&value_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            record.set_field(&langcode, field_name, value);
        }
        Ok(Some(record))
    }

    fn delete_record(&mut self, entity_id: EntityId) -> Result<bool, StorageError> {
        let deleted = self.conn.execute(
            "DELETE FROM records WHERE entity_id = ?1",
            rusqlite::params![entity_id.as_bytes().as_slice()],
        )?;
        Ok(deleted > 0)
    }

    fn define_reference_field(
        &mut self,
        definition: &ReferenceFieldDefinition,
    ) -> Result<(), StorageError> {
        let settings = definition.settings.to_json_string()?;
        self.conn.execute(
            "INSERT INTO reference_fields (entity_type, bundle, field_name, target_type, field_type, cardinality, settings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(entity_type, bundle, field_name) DO UPDATE SET target_type = excluded.target_type,
                 field_type = excluded.field_type, cardinality = excluded.cardinality, settings = excluded.settings",
            rusqlite::params![
                definition.entity_type,
                definition.bundle,
                definition.field_name,
                definition.target_type,
                definition.kind.as_str(),
                definition.cardinality.to_i64(),
                settings,
            ],
        )?;
        Ok(())
    }

    fn get_reference_field(
        &self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<Option<ReferenceFieldDefinition>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT target_type, field_type, cardinality, settings FROM reference_fields
                 WHERE entity_type = ?1 AND bundle = ?2 AND field_name = ?3",
                rusqlite::params![entity_type, bundle, field_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((target_type, field_type, cardinality, settings)) = row else {
            return Ok(None);
        };
        Ok(Some(
            ReferenceFieldDefinition::new(entity_type, bundle, field_name, target_type)
                .with_kind(ReferenceKind::parse(&field_type)?)
                .with_cardinality(Cardinality::from_i64(cardinality)?)
                .with_settings(FieldOverrideSettings::from_json_str(&settings)?),
        ))
    }

    fn set_reference_items(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        items: &[ReferenceItem],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM reference_items WHERE host_id = ?1 AND langcode = ?2 AND field_name = ?3",
            rusqlite::params![host_id.as_bytes().as_slice(), langcode, field_name],
        )?;
        for (delta, item) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO reference_items (host_id, langcode, field_name, delta, target_id, override_map)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    host_id.as_bytes().as_slice(),
                    langcode,
                    field_name,
                    delta as i64,
                    item.target_id.as_bytes().as_slice(),
                    item.override_map.as_deref(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_reference_items(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
    ) -> Result<Vec<StoredReference>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT host_id, langcode, field_name, delta, target_id, override_map FROM reference_items
             WHERE host_id = ?1 AND langcode = ?2 AND field_name = ?3 ORDER BY delta",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![host_id.as_bytes().as_slice(), langcode, field_name],
            read_reference,
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(to_stored_reference(row?)?);
        }
        Ok(result)
    }

    fn get_reference_item(
        &self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
    ) -> Result<Option<StoredReference>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT host_id, langcode, field_name, delta, target_id, override_map FROM reference_items
                 WHERE host_id = ?1 AND langcode = ?2 AND field_name = ?3 AND delta = ?4",
                rusqlite::params![host_id.as_bytes().as_slice(), langcode, field_name, i64::from(delta)],
                read_reference,
            )
            .optional()?;
        row.map(to_stored_reference).transpose()
    }

    fn set_override_map(
        &mut self,
        host_id: EntityId,
        langcode: &str,
        field_name: &str,
        delta: u32,
        raw: &str,
    ) -> Result<(), StorageError> {
        let updated = self.conn.execute(
            "UPDATE reference_items SET override_map = ?1
             WHERE host_id = ?2 AND langcode = ?3 AND field_name = ?4 AND delta = ?5",
            rusqlite::params![
                raw,
                host_id.as_bytes().as_slice(),
                langcode,
                field_name,
                i64::from(delta),
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!(
                "reference item {host_id}/{langcode}/{field_name}/{delta}"
            )));
        }
        Ok(())
    }

    fn upgrade_reference_field(
        &mut self,
        entity_type: &str,
        bundle: &str,
        field_name: &str,
    ) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;

        let field_type: Option<String> = tx
            .query_row(
                "SELECT field_type FROM reference_fields WHERE entity_type = ?1 AND bundle = ?2 AND field_name = ?3",
                rusqlite::params![entity_type, bundle, field_name],
                |row| row.get(0),
            )
            .optional()?;
        match field_type.as_deref().map(ReferenceKind::parse).transpose()? {
            None => {
                return Err(StorageError::NotFound(format!(
                    "reference field {entity_type}.{bundle}.{field_name}"
                )));
            }
            Some(ReferenceKind::Override) => {
                return Err(StorageError::ConstraintViolation(format!(
                    "{entity_type}.{bundle}.{field_name} already stores overrides"
                )));
            }
            Some(ReferenceKind::Plain) => {}
        }

        tx.execute(
            "UPDATE reference_fields SET field_type = ?1 WHERE entity_type = ?2 AND bundle = ?3 AND field_name = ?4",
            rusqlite::params![ReferenceKind::Override.as_str(), entity_type, bundle, field_name],
        )?;
        let touched = tx.execute(
            "UPDATE reference_items SET override_map = ?1
             WHERE field_name = ?2 AND override_map IS NULL
               AND host_id IN (SELECT entity_id FROM records WHERE entity_type = ?3 AND bundle = ?4)",
            rusqlite::params![OverrideMap::EMPTY_SENTINEL, field_name, entity_type, bundle],
        )?;

        tx.commit()?;
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(name: &str) -> CanonicalRecord {
        CanonicalRecord::new("media", "image", "en")
            .with_field("name", Tree::leaf(name))
            .with_field(
                "field_media_image",
                Tree::from_json_str(r#"[{"target_id": 1, "alt": "alt"}]"#).unwrap(),
            )
    }

    #[test]
    fn record_round_trip_with_translations() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let mut record = media("Mr. Jones");
        record.add_translation("de", FieldSet::from([("name".to_string(), Tree::leaf("Herr Jones"))]));
        storage.insert_record(&record)?;

        let loaded = storage.get_record(record.id)?.unwrap();
        assert_eq!(loaded, record);
        Ok(())
    }

    #[test]
    fn duplicate_insert_is_a_collision() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let record = media("a");
        storage.insert_record(&record)?;
        let err = storage.insert_record(&record).unwrap_err();
        assert!(matches!(err, StorageError::RecordCollision { .. }));
        Ok(())
    }

    #[test]
    fn save_replaces_fields() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let mut record = media("before");
        storage.insert_record(&record)?;
        record.set_field("en", "name", Tree::leaf("after"));
        storage.save_record(&record)?;
        let loaded = storage.get_record(record.id)?.unwrap();
        assert_eq!(loaded.label(), Some("after"));
        Ok(())
    }

    #[test]
    fn deleting_a_host_drops_its_items() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let target = media("target");
        let host = CanonicalRecord::new("node", "article", "en");
        storage.insert_record(&target)?;
        storage.insert_record(&host)?;
        storage.set_reference_items(host.id, "en", "field_media", &[ReferenceItem::new(target.id)])?;

        assert!(storage.delete_record(host.id)?);
        assert!(storage.get_reference_items(host.id, "en", "field_media")?.is_empty());
        Ok(())
    }

    #[test]
    fn items_keep_delta_order_and_override_text() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let (a, b) = (media("a"), media("b"));
        let host = CanonicalRecord::new("node", "article", "en");
        for record in [&a, &b, &host] {
            storage.insert_record(record)?;
        }
        storage.set_reference_items(
            host.id,
            "en",
            "field_media",
            &[
                ReferenceItem::new(a.id).with_override_map("{}"),
                ReferenceItem::new(b.id).with_override_map(r#"{"name":"x"}"#),
            ],
        )?;

        let items = storage.get_reference_items(host.id, "en", "field_media")?;
        assert_eq!(items.iter().map(|i| i.target_id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(items[1].delta, 1);
        assert_eq!(items[1].override_map.as_deref(), Some(r#"{"name":"x"}"#));

        storage.set_override_map(host.id, "en", "field_media", 0, r#"{"name":"y"}"#)?;
        let first = storage.get_reference_item(host.id, "en", "field_media", 0)?.unwrap();
        assert_eq!(first.override_map.as_deref(), Some(r#"{"name":"y"}"#));

        let err = storage
            .set_override_map(host.id, "en", "field_media", 5, "{}")
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn field_definition_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let definition = ReferenceFieldDefinition::new("node", "article", "field_media", "media")
            .with_cardinality(Cardinality::Limited(1))
            .with_settings(FieldOverrideSettings::new().allow("image", ["name"]));
        storage.define_reference_field(&definition)?;
        assert_eq!(
            storage.get_reference_field("node", "article", "field_media")?,
            Some(definition)
        );
        assert_eq!(storage.get_reference_field("node", "page", "field_media")?, None);
        Ok(())
    }

    #[test]
    fn on_disk_database_keeps_records() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("records.db");
        let path = path.to_str().ok_or("non-UTF-8 temp path")?;
        let record = media("kept");
        {
            let mut storage = SqliteStorage::open(path)?;
            storage.insert_record(&record)?;
        }
        let storage = SqliteStorage::open(path)?;
        assert_eq!(storage.get_record(record.id)?, Some(record));
        Ok(())
    }
}
