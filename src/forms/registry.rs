use crate::forms::storage::{atomic_write_json, read_json};
use crate::forms::*;

/// Where form schemas are kept.
pub trait SchemaRegistry: Send + Sync {
    fn get(&self, id: &SchemaId) -> FormsResult<Option<FormSchema>>;

    /// Stores a new schema. Schemas are immutable: storing an id twice is an error.
    fn put(&self, schema: &FormSchema) -> FormsResult<()>;

    /// All the schemas, oldest first.
    fn list(&self) -> FormsResult<Vec<FormSchema>>;
}

/// Form ids end up in file names, so only a conservative set of characters is allowed.
pub fn check_schema_id(id: &SchemaId) -> FormsResult<()> {
    let s = id.as_str();
    ensure!(
        !s.is_empty()
            && s.len() <= 64
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        InvalidSchemaIdSnafu { text: s }
    );
    Ok(())
}

/// One JSON file per schema, under `<data dir>/schemas/`.
#[derive(Debug, Clone)]
pub struct FileSchemaRegistry {
    dir: PathBuf,
}

impl FileSchemaRegistry {
    pub fn new(dir: PathBuf) -> FileSchemaRegistry {
        FileSchemaRegistry { dir }
    }

    fn path_of(&self, id: &SchemaId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl SchemaRegistry for FileSchemaRegistry {
    fn get(&self, id: &SchemaId) -> FormsResult<Option<FormSchema>> {
        check_schema_id(id)?;
        read_json(&self.path_of(id))
    }

    fn put(&self, schema: &FormSchema) -> FormsResult<()> {
        check_schema_id(&schema.id)?;
        let path = self.path_of(&schema.id);
        ensure!(
            !path.exists(),
            SchemaExistsSnafu {
                schema_id: schema.id.clone()
            }
        );
        atomic_write_json(&path, schema)?;
        info!("put: stored form {} ({:?})", schema.id, schema.title);
        Ok(())
    }

    fn list(&self) -> FormsResult<Vec<FormSchema>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).context(IoSnafu {
                    path: self.dir.display().to_string(),
                })
            }
        };
        let mut res: Vec<FormSchema> = Vec::new();
        for entry in entries {
            let entry = entry.context(IoSnafu {
                path: self.dir.display().to_string(),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(schema) = read_json::<FormSchema>(&path)? {
                res.push(schema);
            }
        }
        res.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(res)
    }
}
