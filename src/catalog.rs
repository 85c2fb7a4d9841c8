use anyhow::{Context, Result};
use std::path::Path;

/// Ordered class names; position `i` is the classifier's logit `i`
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            anyhow::bail!("class catalog is empty");
        }
        Ok(Self { names })
    }

    /// Load a JSON array of class names
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("reading class names {}", path.display()))?;
        let names: Vec<String> = serde_json::from_slice(&data)
            .with_context(|| format!("parsing class names {}", path.display()))?;
        Self::from_names(names).with_context(|| format!("loading {}", path.display()))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_json_array() {
        let path = std::env::temp_dir().join(format!("facerank-{}-classes.json", std::process::id()));
        std::fs::write(&path, r#"["alice", "bob", "carol"]"#).unwrap();
        let catalog = ClassCatalog::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(catalog.names().len(), 3);
        assert_eq!(catalog.name(1), Some("bob"));
        assert_eq!(catalog.name(3), None);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(ClassCatalog::from_names(vec![]).is_err());
    }

    #[test]
    fn test_malformed_file_rejected() {
        let path = std::env::temp_dir().join(format!("facerank-{}-bad.json", std::process::id()));
        std::fs::write(&path, r#"{"0": "alice"}"#).unwrap();
        let err = ClassCatalog::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{:#}", err).contains("parsing class names"));
    }
}
