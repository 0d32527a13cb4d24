//! Overpass QL text for a set of element classes over one area filter.

use std::collections::BTreeSet;

use crate::models::{BBox, ElementType, GeneratorOptions, LonLat};

const HEADER: &str = "[out:json][timeout:25];(";
const FOOTER: &str = ");out geom;";
const FOOTPATH_EXCLUSION: &str = r#"["highway"!~"^(footway|path|pedestrian|cycleway|steps)$"]"#;
const OCEAN_EXCLUSION: &str = r#"["water"!~"^(sea|ocean)$"]"#;

/// Spatial restriction applied to every clause. A polygon wins over a bbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaFilter<'a> {
    pub polygon: Option<&'a [LonLat]>,
    pub bbox: Option<&'a BBox>,
}

impl<'a> AreaFilter<'a> {
    pub fn bbox(bbox: &'a BBox) -> Self {
        Self {
            polygon: None,
            bbox: Some(bbox),
        }
    }

    pub fn polygon(ring: &'a [LonLat]) -> Self {
        Self {
            polygon: Some(ring),
            bbox: None,
        }
    }

    fn render(&self) -> String {
        if let Some(ring) = self.polygon {
            let points: Vec<String> = ring
                .iter()
                .map(|[lon, lat]| format!("{lat} {lon}"))
                .collect();
            format!("(poly:\"{}\")", points.join(" "))
        } else if let Some(b) = self.bbox {
            format!("({},{},{},{})", b.south, b.west, b.north, b.east)
        } else {
            String::new()
        }
    }
}

/// Render the query. Clauses always come out in buildings, roads, water,
/// green order, so equal inputs give byte-identical text.
pub fn build_query(
    elements: &BTreeSet<ElementType>,
    filter: AreaFilter<'_>,
    options: &GeneratorOptions,
) -> String {
    let f = filter.render();
    let mut query = String::from(HEADER);
    for element in elements {
        query.push_str(&clauses(*element, &f, options));
    }
    query.push_str(FOOTER);
    query
}

fn clauses(element: ElementType, f: &str, options: &GeneratorOptions) -> String {
    match element {
        ElementType::Buildings => format!(r#"way["building"]{f};relation["building"]{f};"#),
        ElementType::Roads if options.footpath_roads_enabled => format!(r#"way["highway"]{f};"#),
        ElementType::Roads => format!(r#"way["highway"]{FOOTPATH_EXCLUSION}{f};"#),
        ElementType::Water => water_clauses(f, options),
        ElementType::Green => format!(
            concat!(
                r#"way["leisure"="park"]{f};relation["leisure"="park"]{f};"#,
                r#"way["landuse"="grass"]{f};relation["landuse"="grass"]{f};"#
            ),
            f = f
        ),
    }
}

fn water_clauses(f: &str, options: &GeneratorOptions) -> String {
    let ocean = if options.ocean_enabled {
        ""
    } else {
        OCEAN_EXCLUSION
    };
    let mut out = format!(
        r#"way["natural"="water"]{ocean}{f};relation["natural"="water"]{ocean}{f};"#
    );
    out.push_str(&format!(r#"way["waterway"]{f};"#));
    if options.piers_enabled {
        out.push_str(&format!(r#"way["man_made"="pier"]{f};"#));
    }
    if options.beach_enabled {
        out.push_str(&format!(r#"way["natural"~"^(sand|beach)$"]{f};"#));
    }
    out
}
