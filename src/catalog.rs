//! Image catalog: maps service names to buildable image directories.
//!
//! Layout under the images root:
//!
//! ```text
//! images/
//!   base/            Dockerfile of the base image
//!   collection/<n>/  bundled service images
//!   user/<n>/        user-defined service images (win over collection)
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const DOCKERFILE: &str = "Dockerfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCategory {
    Base,
    Collection,
    User,
}

impl ImageCategory {
    fn dir_name(&self) -> &'static str {
        match self {
            ImageCategory::Base => "base",
            ImageCategory::Collection => "collection",
            ImageCategory::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDef {
    pub name: String,
    pub category: ImageCategory,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImageCatalog {
    root: PathBuf,
    base_name: String,
    base: Option<ImageDef>,
    images: BTreeMap<String, ImageDef>,
}

impl ImageCatalog {
    /// An empty catalog rooted at `root`; call [`load`](Self::load) to scan it.
    pub fn new(root: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_name: base_name.into(),
            base: None,
            images: BTreeMap::new(),
        }
    }

    /// Build a catalog from known definitions without touching the filesystem.
    pub fn from_images(base: Option<ImageDef>, images: impl IntoIterator<Item = ImageDef>) -> Self {
        let base_name = base
            .as_ref()
            .map(|b| b.name.clone())
            .unwrap_or_default();
        Self {
            root: PathBuf::new(),
            base_name,
            base,
            images: images.into_iter().map(|i| (i.name.clone(), i)).collect(),
        }
    }

    /// Rescan the images root.
    ///
    /// A missing root or category directory yields an empty section, not an
    /// error; unreadable directories do fail.
    pub fn load(&mut self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Ok(());
        }

        let base_dir = self.root.join(ImageCategory::Base.dir_name());
        self.base = has_dockerfile(&base_dir).then(|| ImageDef {
            name: self.base_name.clone(),
            category: ImageCategory::Base,
            path: base_dir,
        });

        let mut images = BTreeMap::new();
        for category in [ImageCategory::Collection, ImageCategory::User] {
            let dir = self.root.join(category.dir_name());
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if !has_dockerfile(&path) {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Some(previous) = images.insert(
                    name.to_string(),
                    ImageDef {
                        name: name.to_string(),
                        category,
                        path: path.clone(),
                    },
                ) {
                    tracing::debug!(
                        "Image '{}' from {:?} shadows {:?}",
                        name,
                        category,
                        previous.category
                    );
                }
            }
        }

        tracing::debug!(
            "Image catalog loaded from {}: {} service image(s), base {}",
            self.root.display(),
            images.len(),
            if self.base.is_some() { "present" } else { "missing" }
        );
        self.images = images;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ImageDef> {
        self.images.get(name)
    }

    pub fn base(&self) -> Option<&ImageDef> {
        self.base.as_ref()
    }

    /// Whether `name` can be built locally from the catalog.
    pub fn is_native(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    /// Every image, base first, then service images sorted by name.
    pub fn list(&self) -> Vec<ImageDef> {
        self.base
            .iter()
            .chain(self.images.values())
            .cloned()
            .collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn has_dockerfile(dir: &Path) -> bool {
    dir.join(DOCKERFILE).is_file()
}
