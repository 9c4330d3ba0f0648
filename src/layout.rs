// 📐 Connector Layout Engine - Mapping records + anchor positions → drawable paths
//
// Pure function of its inputs:
//   (mappings, selection, anchor positions, visible accounts) → [ConnectorDescriptor]
//
// The presentation layer owns pixel measurement and calls this again whenever
// any input changes; nothing here observes layout or resize events.
//
// Path policy: horizontal S-curve (cubic Bézier) between the two anchors.
// Control points sit at the horizontal midpoint at each endpoint's height, so
// the curve leaves and enters both columns horizontally. Endpoints are exact.

use crate::entities::{AccountSide, Cardinality, Mapping};
use crate::store::{Selection, WorkspaceState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Cubic Bézier from `start` to `end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubicPath {
    pub start: Point,
    pub control1: Point,
    pub control2: Point,
    pub end: Point,
}

impl CubicPath {
    /// Horizontal S-curve between two anchors
    pub fn s_curve(start: Point, end: Point) -> Self {
        let mid_x = (start.x + end.x) / 2.0;
        CubicPath {
            start,
            control1: Point::new(mid_x, start.y),
            control2: Point::new(mid_x, end.y),
            end,
        }
    }

    /// Point on the curve at parameter t ∈ [0, 1]
    pub fn sample(&self, t: f64) -> Point {
        let t = t.clamp(0.0, 1.0);
        let u = 1.0 - t;
        let b0 = u * u * u;
        let b1 = 3.0 * u * u * t;
        let b2 = 3.0 * u * t * t;
        let b3 = t * t * t;
        Point::new(
            b0 * self.start.x + b1 * self.control1.x + b2 * self.control2.x + b3 * self.end.x,
            b0 * self.start.y + b1 * self.control1.y + b2 * self.control2.y + b3 * self.end.y,
        )
    }

    pub fn midpoint(&self) -> Point {
        self.sample(0.5)
    }

    /// `segments + 1` evenly spaced points, for renderers without curve primitives
    pub fn polyline(&self, segments: usize) -> Vec<Point> {
        let segments = segments.max(1);
        (0..=segments)
            .map(|i| self.sample(i as f64 / segments as f64))
            .collect()
    }

    /// SVG path data: "M x,y C c1 c2 end"
    pub fn to_svg_path(&self) -> String {
        format!(
            "M{:.2},{:.2} C{:.2},{:.2} {:.2},{:.2} {:.2},{:.2}",
            self.start.x,
            self.start.y,
            self.control1.x,
            self.control1.y,
            self.control2.x,
            self.control2.y,
            self.end.x,
            self.end.y
        )
    }
}

// ============================================================================
// ANCHORS
// ============================================================================

/// One anchor per account card
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId {
    pub side: AccountSide,
    pub account_number: String,
}

impl AnchorId {
    pub fn new(side: AccountSide, account_number: &str) -> Self {
        AnchorId {
            side,
            account_number: account_number.to_string(),
        }
    }

    pub fn source(account_number: &str) -> Self {
        AnchorId::new(AccountSide::Source, account_number)
    }

    pub fn target(account_number: &str) -> Self {
        AnchorId::new(AccountSide::Target, account_number)
    }
}

/// Live anchor-id → screen position table supplied by the presentation layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorPositions {
    positions: HashMap<AnchorId, Point>,
}

impl AnchorPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, anchor: AnchorId, point: Point) {
        self.positions.insert(anchor, point);
    }

    pub fn get(&self, anchor: &AnchorId) -> Option<Point> {
        self.positions.get(anchor).copied()
    }

    pub fn remove(&mut self, anchor: &AnchorId) {
        self.positions.remove(anchor);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// ============================================================================
// STYLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DashPattern {
    Solid,
    Dashed,
    Dotted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorStyle {
    /// "#rrggbb"
    pub color: &'static str,
    pub dash: DashPattern,
    pub stroke_width: f64,
}

pub const BASE_STROKE: f64 = 1.5;
pub const FOCUSED_STROKE: f64 = 3.0;

impl ConnectorStyle {
    /// Distinct colour and dash per cardinality, heavier stroke when focused
    pub fn for_cardinality(cardinality: Cardinality, focused: bool) -> Self {
        let (color, dash) = match cardinality {
            Cardinality::OneToOne => ("#2563eb", DashPattern::Solid),
            Cardinality::OneToMany => ("#16a34a", DashPattern::Dashed),
            Cardinality::ManyToOne => ("#d97706", DashPattern::Dotted),
        };
        ConnectorStyle {
            color,
            dash,
            stroke_width: if focused { FOCUSED_STROKE } else { BASE_STROKE },
        }
    }

    /// SVG stroke-dasharray value
    pub fn dash_array(&self) -> Option<&'static str> {
        match self.dash {
            DashPattern::Solid => None,
            DashPattern::Dashed => Some("6 4"),
            DashPattern::Dotted => Some("2 3"),
        }
    }
}

// ============================================================================
// CONNECTOR DESCRIPTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorLabel {
    /// "50%"
    pub text: String,
    pub position: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorDescriptor {
    pub mapping_id: String,
    pub source: Point,
    pub target: Point,
    pub path: CubicPath,
    pub cardinality: Cardinality,
    pub weight: f64,
    pub selected: bool,
    pub style: ConnectorStyle,
    pub label: Option<ConnectorLabel>,
}

/// Accounts currently rendered on each side (post-filter)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleAccounts {
    pub sources: HashSet<String>,
    pub targets: HashSet<String>,
}

impl VisibleAccounts {
    pub fn from_state(state: &WorkspaceState) -> Self {
        VisibleAccounts {
            sources: state
                .visible_accounts(AccountSide::Source)
                .into_iter()
                .map(|a| a.account_number.clone())
                .collect(),
            targets: state
                .visible_accounts(AccountSide::Target)
                .into_iter()
                .map(|a| a.account_number.clone())
                .collect(),
        }
    }

    pub fn contains(&self, mapping: &Mapping) -> bool {
        self.sources.contains(&mapping.source_account_number)
            && self.targets.contains(&mapping.target_account_number)
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

pub struct ConnectorLayout;

impl ConnectorLayout {
    /// Descriptors for every mapping with both ends visible and anchored,
    /// in mapping order with the focused connector moved last (drawn on top).
    pub fn compute(
        mappings: &[Mapping],
        selection: &Selection,
        anchors: &AnchorPositions,
        visible: &VisibleAccounts,
    ) -> Vec<ConnectorDescriptor> {
        let focused = selection.focused_mapping();

        let mut descriptors: Vec<ConnectorDescriptor> = mappings
            .iter()
            .filter(|m| visible.contains(m))
            .filter_map(|m| {
                let source = anchors.get(&AnchorId::source(&m.source_account_number))?;
                let target = anchors.get(&AnchorId::target(&m.target_account_number))?;
                Some(Self::describe(m, source, target, focused == Some(m.mapping_id.as_str())))
            })
            .collect();

        // Stable: relative order of the others is untouched
        descriptors.sort_by_key(|d| d.selected);
        descriptors
    }

    /// Convenience over a whole workspace state
    pub fn for_state(state: &WorkspaceState, anchors: &AnchorPositions) -> Vec<ConnectorDescriptor> {
        let visible = VisibleAccounts::from_state(state);
        Self::compute(&state.mappings, &state.selection, anchors, &visible)
    }

    fn describe(mapping: &Mapping, source: Point, target: Point, selected: bool) -> ConnectorDescriptor {
        let path = CubicPath::s_curve(source, target);
        let cardinality = mapping.cardinality();

        let label = match cardinality {
            Cardinality::OneToMany if mapping.split_weight < 1.0 => Some(ConnectorLabel {
                text: format_percent(mapping.split_weight),
                position: path.midpoint(),
            }),
            Cardinality::OneToMany | Cardinality::OneToOne | Cardinality::ManyToOne => None,
        };

        ConnectorDescriptor {
            mapping_id: mapping.mapping_id.clone(),
            source,
            target,
            path,
            cardinality,
            weight: mapping.split_weight,
            selected,
            style: ConnectorStyle::for_cardinality(cardinality, selected),
            label,
        }
    }
}

/// 0.5 → "50%", 1/3 → "33.3%"
pub fn format_percent(weight: f64) -> String {
    let pct = weight * 100.0;
    if (pct - pct.round()).abs() < 0.05 {
        format!("{}%", pct.round() as i64)
    } else {
        format!("{:.1}%", pct)
    }
}

// ============================================================================
// TESTS
// ============================================================================
