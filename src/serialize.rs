//! Serialization and Persistence
//!
//! This module provides the object registry used to instantiate objects by
//! type name, and the serializable patch definition used to save and restore
//! a patch (objects, geometry, custom variables and links).

use crate::config::{AudioSettings, EngineConfig};
use crate::graph::{ObjectId, Patch, PatchError};
use crate::object::{CustomVars, PatchObject};
use crate::objects::*;
use crate::pin::{PinKind, PinSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Serializable patch definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDef {
    /// Schema version for forward compatibility
    pub version: u32,

    /// Patch metadata
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,

    /// Object instances, in evaluation order
    pub objects: Vec<ObjectDef>,

    /// Links between object pins
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

impl PatchDef {
    /// Create a new empty patch definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 1,
            name: name.into(),
            author: None,
            description: None,
            objects: vec![],
            links: vec![],
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for PatchDef {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Serializable object definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDef {
    /// Id the object had when saved; only meaningful inside this file
    pub id: u64,

    /// Registry type name
    pub type_name: String,

    /// Display name
    pub name: String,

    pub position: (f32, f32),

    #[serde(default)]
    pub size: Option<(f32, f32)>,

    #[serde(default, skip_serializing_if = "CustomVars::is_empty")]
    pub vars: CustomVars,
}

impl ObjectDef {
    pub fn new(id: u64, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            id,
            name: type_name.clone(),
            type_name,
            position: (0.0, 0.0),
            size: None,
            vars: CustomVars::new(),
        }
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_var(mut self, key: &str, value: impl Into<crate::object::CustomValue>) -> Self {
        self.vars.set(key, value);
        self
    }
}

/// Serializable link definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    /// Source object, by [`ObjectDef::id`]
    pub from: u64,
    pub outlet: usize,

    /// Destination object, by [`ObjectDef::id`]
    pub to: u64,
    pub inlet: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl LinkDef {
    pub fn new(from: u64, outlet: usize, to: u64, inlet: usize) -> Self {
        Self {
            from,
            outlet,
            to,
            inlet,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Object factory function type
pub type ObjectFactory = Box<dyn Fn(&AudioSettings) -> Box<dyn PatchObject> + Send + Sync>;

/// Metadata about a registered object type
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub type_name: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub pins: PinSpec,
}

/// Registry of available object types for instantiation
pub struct ObjectRegistry {
    factories: HashMap<String, ObjectFactory>,
    metadata: HashMap<String, ObjectMetadata>,
}

impl ObjectRegistry {
    /// Create a registry holding the built-in objects
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin();
        registry
    }

    /// Create a registry with no object types
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    fn register_builtin(&mut self) {
        // Math
        self.register(
            "constant",
            "Constant",
            "Math",
            "Outputs a fixed number",
            |_| Box::new(Constant::default()),
        );

        self.register(
            "add",
            "Add",
            "Math",
            "Sum of two numbers",
            |_| Box::new(Add::new()),
        );

        self.register(
            "multiply",
            "Multiply",
            "Math",
            "Product of two numbers",
            |_| Box::new(Multiply::new()),
        );

        self.register(
            "smooth",
            "Smooth",
            "Math",
            "One-pole smoothing of a changing number",
            |_| Box::new(Smooth::default()),
        );

        // Control
        self.register(
            "bang",
            "Bang",
            "Control",
            "One-frame bang on each rising edge",
            |_| Box::new(Bang::new()),
        );

        self.register(
            "counter",
            "Counter",
            "Control",
            "Counts bangs, with reset",
            |_| Box::new(Counter::new()),
        );

        self.register(
            "gate",
            "Gate",
            "Control",
            "Routes one of two numeric inputs",
            |_| Box::new(Gate::new(PinKind::Numeric, 2)),
        );

        self.register(
            "spigot",
            "Spigot",
            "Control",
            "Passes a number while open",
            |_| Box::new(Spigot::new()),
        );

        // Text
        self.register(
            "message",
            "Message",
            "Text",
            "Sends a text message",
            |_| Box::new(Message::default()),
        );

        self.register(
            "string gate",
            "String Gate",
            "Text",
            "Routes one of two text inputs",
            |_| Box::new(Gate::new(PinKind::String, 2)),
        );

        self.register(
            "text file",
            "Text File",
            "Text",
            "Loads a text file in the background",
            |_| Box::new(TextFile::default()),
        );

        // Arrays
        self.register(
            "pack",
            "Pack",
            "Arrays",
            "Collects four numbers into an array",
            |_| Box::new(Pack::new(4)),
        );

        self.register(
            "array gate",
            "Array Gate",
            "Arrays",
            "Routes one of two array inputs",
            |_| Box::new(Gate::new(PinKind::Array, 2)),
        );

        // Video
        self.register(
            "texture gate",
            "Texture Gate",
            "Video",
            "Routes one of two texture inputs",
            |_| Box::new(Gate::new(PinKind::Texture, 2)),
        );

        // Audio
        self.register(
            "audio in",
            "Audio In",
            "Audio",
            "Audio captured from the device, with peak level",
            |settings| Box::new(AudioIn::new(settings)),
        );

        self.register(
            "audio out",
            "Audio Out",
            "Audio",
            "Sends audio to the device",
            |settings| Box::new(AudioOut::new(settings)),
        );
    }

    /// Register an object factory with metadata. Registering a type name
    /// again replaces the previous entry.
    pub fn register<F>(
        &mut self,
        type_name: &str,
        name: &str,
        category: &str,
        description: &str,
        factory: F,
    ) where
        F: Fn(&AudioSettings) -> Box<dyn PatchObject> + Send + Sync + 'static,
    {
        // Get pins from a temporary instance
        let mut temp_instance = factory(&AudioSettings::default());
        let pins = temp_instance.declare_pins();

        self.factories
            .insert(type_name.to_string(), Box::new(factory));

        self.metadata.insert(
            type_name.to_string(),
            ObjectMetadata {
                type_name: type_name.to_string(),
                name: name.to_string(),
                category: category.to_string(),
                description: description.to_string(),
                pins,
            },
        );
    }

    /// Instantiate an object by type name
    pub fn instantiate(
        &self,
        type_name: &str,
        settings: &AudioSettings,
    ) -> Option<Box<dyn PatchObject>> {
        self.factories.get(type_name).map(|f| f(settings))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// All registered object types, sorted by type name
    pub fn list(&self) -> Vec<&ObjectMetadata> {
        let mut all: Vec<_> = self.metadata.values().collect();
        all.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        all
    }

    /// Get metadata for a specific object type
    pub fn get_metadata(&self, type_name: &str) -> Option<&ObjectMetadata> {
        self.metadata.get(type_name)
    }

    /// List object types in a specific category
    pub fn list_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a ObjectMetadata> {
        self.metadata
            .values()
            .filter(move |m| m.category == category)
    }

    /// Get all unique categories
    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<_> = self.metadata.values().map(|m| m.category.clone()).collect();
        cats.sort();
        cats.dedup();
        cats
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension methods for Patch to support serialization
impl Patch {
    /// Convert patch to a serializable definition
    ///
    /// Objects already marked for removal are left out, together with their
    /// links.
    pub fn to_def(&self, name: &str) -> PatchDef {
        let objects: Vec<ObjectDef> = self
            .objects()
            .filter(|info| info.is_live())
            .map(|info| ObjectDef {
                id: info.id.as_u64(),
                type_name: info.type_name.clone(),
                name: info.name.clone(),
                position: info.position,
                size: Some(info.size),
                vars: self.custom_vars(info.id).cloned().unwrap_or_default(),
            })
            .collect();

        let links: Vec<LinkDef> = self
            .links()
            .filter(|link| self.is_live(link.from.object) && self.is_live(link.to.object))
            .map(|link| LinkDef {
                from: link.from.object.as_u64(),
                outlet: link.from.pin,
                to: link.to.object.as_u64(),
                inlet: link.to.pin,
                enabled: link.enabled,
            })
            .collect();

        PatchDef {
            version: 1,
            name: name.to_string(),
            author: None,
            description: None,
            objects,
            links,
        }
    }

    /// Build a patch from a definition
    ///
    /// Objects get fresh ids; links are remapped onto them.
    pub fn from_def(
        def: &PatchDef,
        registry: Arc<ObjectRegistry>,
        config: &EngineConfig,
    ) -> Result<Self, PatchError> {
        let mut patch = Patch::with_registry(registry, config);
        let mut saved_to_live: HashMap<u64, ObjectId> = HashMap::new();

        // Instantiate objects
        for object_def in &def.objects {
            let id = patch.create_object(&object_def.type_name, object_def.position)?;
            patch.set_name(id, object_def.name.as_str());
            if let Some(size) = object_def.size {
                patch.set_size(id, size);
            }
            if !object_def.vars.is_empty() {
                patch.set_custom_vars(id, object_def.vars.clone());
            }

            if saved_to_live.insert(object_def.id, id).is_some() {
                return Err(PatchError::Serialization(format!(
                    "duplicate object id {}",
                    object_def.id
                )));
            }
        }

        // Create links
        for link_def in &def.links {
            let from = resolve(&saved_to_live, link_def.from)?;
            let to = resolve(&saved_to_live, link_def.to)?;
            let link = patch.connect(from, link_def.outlet, to, link_def.inlet)?;
            if !link_def.enabled {
                patch.set_link_enabled(link, false);
            }
        }

        Ok(patch)
    }

    /// Parse a JSON patch definition and build it
    pub fn from_json(
        json: &str,
        registry: Arc<ObjectRegistry>,
        config: &EngineConfig,
    ) -> Result<Self, PatchError> {
        let def = PatchDef::from_json(json).map_err(|e| PatchError::Serialization(e.to_string()))?;
        Self::from_def(&def, registry, config)
    }
}

fn resolve(ids: &HashMap<u64, ObjectId>, saved: u64) -> Result<ObjectId, PatchError> {
    ids.get(&saved).copied().ok_or_else(|| {
        PatchError::Serialization(format!("link references unknown object {}", saved))
    })
}
