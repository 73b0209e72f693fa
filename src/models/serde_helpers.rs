// Serde helpers for geometry columns that may come back from the API in several encodings.

use serde::{Deserialize, Deserializer};

use crate::geo::{self, Coordinate};

/// Deserializes an optional point from WKT text (`POINT(lng lat)`), hex-encoded (E)WKB as
/// PostGIS returns it by default, or a GeoJSON `Point` object. Unknown shapes become `None`.
pub fn deserialize_point<'de, D>(deserializer: D) -> Result<Option<Coordinate>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PointFormat {
        Text(String),
        GeoJson {
            #[serde(rename = "type")]
            kind: String,
            coordinates: [f64; 2],
        },
    }

    let value = Option::<PointFormat>::deserialize(deserializer)?;
    Ok(match value {
        None => None,
        Some(PointFormat::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if s.to_ascii_uppercase().contains("POINT") {
                geo::parse_point(s)
            } else {
                parse_wkb_point_hex(s)
            }
        }
        Some(PointFormat::GeoJson { kind, coordinates }) if kind == "Point" => {
            Some(Coordinate::from_lng_lat(coordinates))
        }
        Some(PointFormat::GeoJson { .. }) => None,
    })
}

/// Accepts identifiers that the backend returns either as strings (uuid) or integers.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdFormat {
        Text(String),
        Number(i64),
    }

    Ok(match IdFormat::deserialize(deserializer)? {
        IdFormat::Text(s) => s,
        IdFormat::Number(n) => n.to_string(),
    })
}

/// Decodes a hex (E)WKB point: byte order, geometry type with optional SRID flag,
/// optional SRID, then x (lng) and y (lat) as IEEE doubles.
pub fn parse_wkb_point_hex(hex: &str) -> Option<Coordinate> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<_, _>>()
        .ok()?;

    let little_endian = match bytes.first()? {
        0 => false,
        1 => true,
        _ => return None,
    };
    let read_u32 = |offset: usize| -> Option<u32> {
        let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
        Some(if little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    };
    let read_f64 = |offset: usize| -> Option<f64> {
        let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
        Some(if little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    };

    let geometry_type = read_u32(1)?;
    const SRID_FLAG: u32 = 0x2000_0000;
    if geometry_type & 0xFFFF != 1 {
        return None;
    }
    let mut offset = 5;
    if geometry_type & SRID_FLAG != 0 {
        offset += 4;
    }
    let lng = read_f64(offset)?;
    let lat = read_f64(offset + 8)?;
    Some(Coordinate::new(lat, lng))
}
