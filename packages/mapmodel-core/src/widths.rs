use std::collections::BTreeMap;

use crate::models::Tags;

const DEFAULT_ROAD_WIDTHS: [(&str, f64); 9] = [
    ("motorway", 25.0),
    ("trunk", 20.0),
    ("primary", 15.0),
    ("secondary", 12.0),
    ("tertiary", 10.0),
    ("residential", 6.0),
    ("service", 5.0),
    ("footway", 2.5),
    ("path", 2.5),
];

const DEFAULT_WATERWAY_WIDTHS: [(&str, f64); 5] = [
    ("river", 20.0),
    ("canal", 12.0),
    ("stream", 4.0),
    ("ditch", 2.0),
    ("drain", 2.0),
];

const ROAD_FALLBACK: &str = "residential";
const WATERWAY_FALLBACK: &str = "stream";

/// Physical widths in meters for road and waterway classes.
#[derive(Debug, Clone, PartialEq)]
pub struct WidthTable {
    roads: BTreeMap<String, f64>,
    waterways: BTreeMap<String, f64>,
}

impl Default for WidthTable {
    fn default() -> Self {
        Self {
            roads: DEFAULT_ROAD_WIDTHS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            waterways: DEFAULT_WATERWAY_WIDTHS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }
}

impl WidthTable {
    /// Returns a copy of this table with the given overrides merged on top.
    /// Non-finite or negative override values are ignored.
    pub fn with_overrides(
        &self,
        roads: &BTreeMap<String, f64>,
        waterways: &BTreeMap<String, f64>,
    ) -> Self {
        let mut table = self.clone();
        merge(&mut table.roads, roads);
        merge(&mut table.waterways, waterways);
        table
    }

    pub fn road_width(&self, highway: &str) -> f64 {
        lookup(&self.roads, highway, ROAD_FALLBACK)
    }

    pub fn waterway_width(&self, waterway: &str) -> f64 {
        lookup(&self.waterways, waterway, WATERWAY_FALLBACK)
    }

    /// Width of the road described by `tags`, 0 when there is no highway tag.
    pub fn road_width_for(&self, tags: &Tags) -> f64 {
        tags.get("highway").map_or(0.0, |kind| self.road_width(kind))
    }

    /// Width of the waterway described by `tags`, 0 when there is no waterway tag.
    pub fn waterway_width_for(&self, tags: &Tags) -> f64 {
        tags.get("waterway")
            .map_or(0.0, |kind| self.waterway_width(kind))
    }
}

fn normalize(kind: &str) -> String {
    kind.trim().to_ascii_lowercase()
}

fn merge(target: &mut BTreeMap<String, f64>, overrides: &BTreeMap<String, f64>) {
    for (kind, width) in overrides {
        if width.is_finite() && *width >= 0.0 {
            target.insert(normalize(kind), *width);
        }
    }
}

fn lookup(table: &BTreeMap<String, f64>, kind: &str, fallback: &str) -> f64 {
    table
        .get(&normalize(kind))
        .or_else(|| table.get(fallback))
        .copied()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_widths() {
        let table = WidthTable::default();
        assert_eq!(table.road_width("motorway"), 25.0);
        assert_eq!(table.road_width("residential"), 6.0);
        assert_eq!(table.waterway_width("river"), 20.0);
        assert_eq!(table.waterway_width("stream"), 4.0);
    }

    #[test]
    fn unknown_values_fall_back() {
        let table = WidthTable::default();
        assert_eq!(table.road_width("living_street"), 6.0);
        assert_eq!(table.waterway_width("weir"), 4.0);
        assert_eq!(table.road_width(" Motorway "), 25.0);
    }

    #[test]
    fn missing_tag_has_no_width() {
        let table = WidthTable::default();
        let tags = Tags::from_pairs([("building", "yes")]);
        assert_eq!(table.road_width_for(&tags), 0.0);
        assert_eq!(table.waterway_width_for(&tags), 0.0);
    }

    #[test]
    fn overrides_do_not_touch_the_base_table() {
        let base = WidthTable::default();
        let roads = BTreeMap::from([("residential".to_string(), 8.0)]);
        let water = BTreeMap::from([("stream".to_string(), 5.0), ("bad".to_string(), f64::NAN)]);
        let custom = base.with_overrides(&roads, &water);

        assert_eq!(custom.road_width("residential"), 8.0);
        assert_eq!(custom.waterway_width("stream"), 5.0);
        assert_eq!(custom.waterway_width("bad"), 5.0);
        assert_eq!(base.road_width("residential"), 6.0);
    }
}
