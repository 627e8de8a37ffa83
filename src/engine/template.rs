//! Board Templates
//!
//! A template fixes the zones of a board (kind and geometry) but not their
//! content. Rounds reference templates by id; every client ships the same
//! registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::catalog::ItemKind;
use crate::core::rng::SeededRng;

/// Zone identifier, unique within a template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}", self.0)
    }
}

/// Placement of a zone on the board, in integer layout units.
///
/// Opaque to the engine; carried through for the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneGeometry {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
    /// Rotation in degrees.
    #[serde(default)]
    pub rotation_deg: i16,
}

/// One slot of a template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTemplate {
    /// Zone id.
    pub id: ZoneId,
    /// Kind of content the zone displays.
    pub kind: ItemKind,
    /// Layout.
    #[serde(default)]
    pub geometry: ZoneGeometry,
}

/// A board layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardTemplate {
    /// Template reference broadcast in `round.start`.
    pub id: String,
    /// Zones in drawing order.
    pub zones: Vec<ZoneTemplate>,
}

/// Template validation errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Two zones share an id.
    #[error("template {template}: duplicate {zone}")]
    DuplicateZone {
        /// Template id.
        template: String,
        /// Offending zone.
        zone: ZoneId,
    },

    /// Two templates share an id.
    #[error("duplicate template id {0}")]
    DuplicateTemplate(String),

    /// Template list could not be parsed.
    #[error("invalid template payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Layout cell size for generated grids.
const CELL: u32 = 160;

impl BoardTemplate {
    /// Build a grid template: one row per `(kind, count)` entry.
    pub fn grid(id: impl Into<String>, rows: &[(ItemKind, usize)]) -> Self {
        let mut zones = Vec::new();
        let mut next_id = 0u32;
        for (row, (kind, count)) in rows.iter().enumerate() {
            for col in 0..*count {
                zones.push(ZoneTemplate {
                    id: ZoneId(next_id),
                    kind: *kind,
                    geometry: ZoneGeometry {
                        x: (col as u32 * CELL) as i32,
                        y: (row as u32 * CELL) as i32,
                        width: CELL - 8,
                        height: CELL - 8,
                        rotation_deg: 0,
                    },
                });
                next_id += 1;
            }
        }
        Self { id: id.into(), zones }
    }

    /// Check zone ids are unique.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let mut seen = BTreeSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id) {
                return Err(TemplateError::DuplicateZone {
                    template: self.id.clone(),
                    zone: zone.id,
                });
            }
        }
        Ok(())
    }

    /// Indices of zones of a kind, in template order.
    pub fn zone_indices(&self, kind: ItemKind) -> Vec<usize> {
        self.zones
            .iter()
            .enumerate()
            .filter(|(_, z)| z.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether the template has at least one zone of a kind.
    pub fn has_kind(&self, kind: ItemKind) -> bool {
        self.zones.iter().any(|z| z.kind == kind)
    }
}

/// All templates known to a deployment, keyed (and therefore sorted) by id.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, BoardTemplate>,
}

impl TemplateRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in layouts.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for template in [
            BoardTemplate::grid(
                "classic-5x5",
                &[(ItemKind::Phrase, 5), (ItemKind::Image, 5)],
            ),
            BoardTemplate::grid(
                "mixed-4x3",
                &[
                    (ItemKind::Phrase, 3),
                    (ItemKind::Image, 3),
                    (ItemKind::Expression, 3),
                    (ItemKind::NumericResult, 3),
                ],
            ),
            BoardTemplate::grid(
                "arithmetic-4x4",
                &[(ItemKind::Expression, 4), (ItemKind::NumericResult, 4)],
            ),
        ] {
            registry.templates.insert(template.id.clone(), template);
        }
        registry
    }

    /// Parse a JSON array of templates.
    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        let list: Vec<BoardTemplate> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for template in list {
            registry.insert(template)?;
        }
        Ok(registry)
    }

    /// Add a template.
    pub fn insert(&mut self, template: BoardTemplate) -> Result<(), TemplateError> {
        template.validate()?;
        if self.templates.contains_key(&template.id) {
            return Err(TemplateError::DuplicateTemplate(template.id));
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Look up a template.
    pub fn get(&self, id: &str) -> Option<&BoardTemplate> {
        self.templates.get(id)
    }

    /// Template ids, sorted.
    pub fn refs(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Pick a template for the next round.
    pub fn select(&self, rng: &mut SeededRng) -> Option<&BoardTemplate> {
        let refs: Vec<&BoardTemplate> = self.templates.values().collect();
        rng.choose(&refs).copied()
    }
}
