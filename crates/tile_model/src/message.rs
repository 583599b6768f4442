//! The unit exchanged between tile storage and consumers.

use std::fmt;
use std::str::FromStr;

use glam::DVec3;
use utmt::{Payload, UtmtRecord};

use crate::annotation::AnnotationDocument;
use crate::contents::{AnnotationTileContents, PointCloudTileContents, TileContents};
use crate::error::{ModelError, Result};

/// A UTM zone: number 1..=60 plus hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtmZone {
    number: u8,
    northern_hemisphere: bool,
}

impl UtmZone {
    /// Used when the first tile carries an invalid zone (Washington, DC).
    pub const FALLBACK: UtmZone = UtmZone {
        number: 18,
        northern_hemisphere: true,
    };

    pub fn new(number: u8, northern_hemisphere: bool) -> Result<Self> {
        if !(1..=60).contains(&number) {
            return Err(ModelError::InvalidZone(number.to_string()));
        }

        Ok(Self {
            number,
            northern_hemisphere,
        })
    }

    #[inline]
    pub fn number(&self) -> u8 {
        self.number
    }

    #[inline]
    pub fn is_northern(&self) -> bool {
        self.northern_hemisphere
    }
}

impl fmt::Display for UtmZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hemisphere = if self.northern_hemisphere { 'N' } else { 'S' };
        write!(f, "{}{}", self.number, hemisphere)
    }
}

/// `10N`, `33s`.
impl FromStr for UtmZone {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || ModelError::InvalidZone(s.to_string());

        let mut chars = trimmed.chars();
        let northern = match chars.next_back() {
            Some('N' | 'n') => true,
            Some('S' | 's') => false,
            _ => return Err(invalid()),
        };

        let number = chars.as_str().parse().map_err(|_| invalid())?;
        Self::new(number, northern).map_err(|_| invalid())
    }
}

/// Origin, UTM zone and contents of one tile. Immutable once built.
///
/// A message without a zone corresponds to the protobuf default (zone 0,
/// southern), which upstream producers emit when they do not know the zone.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMessage {
    origin: DVec3,
    zone: Option<UtmZone>,
    contents: TileContents,
}

impl TileMessage {
    pub fn new(origin: DVec3, zone: UtmZone, contents: TileContents) -> Self {
        Self {
            origin,
            zone: Some(zone),
            contents,
        }
    }

    pub fn without_zone(origin: DVec3, contents: TileContents) -> Self {
        Self {
            origin,
            zone: None,
            contents,
        }
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn utm_zone(&self) -> Option<UtmZone> {
        self.zone
    }

    /// 0 when the zone is unspecified.
    pub fn utm_zone_number(&self) -> u8 {
        self.zone.map_or(0, |z| z.number())
    }

    pub fn utm_zone_northern_hemisphere(&self) -> bool {
        self.zone.map_or(false, |z| z.is_northern())
    }

    pub fn contents(&self) -> &TileContents {
        &self.contents
    }

    pub fn into_contents(self) -> TileContents {
        self.contents
    }

    pub fn to_record(&self) -> Result<UtmtRecord> {
        let payload = match &self.contents {
            TileContents::Empty => Payload::Empty,
            TileContents::PointCloud(pc) => Payload::Points {
                positions: pc.points().chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
                colors: pc.colors().chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
            },
            TileContents::Annotations(a) => {
                Payload::AnnotationJson(AnnotationDocument::new(self.zone, &a.annotations)?.to_vec()?)
            }
        };

        Ok(UtmtRecord {
            origin: self.origin.to_array(),
            utm_zone_number: self.utm_zone_number() as u32,
            northern_hemisphere: self.utm_zone_northern_hemisphere(),
            payload,
        })
    }

    pub fn from_record(record: UtmtRecord) -> Result<Self> {
        let contents = match record.payload {
            Payload::Empty => TileContents::Empty,
            Payload::Points { positions, colors } => TileContents::PointCloud(
                PointCloudTileContents::new(positions.concat(), colors.concat())?,
            ),
            Payload::AnnotationJson(json) => {
                TileContents::Annotations(AnnotationTileContents::from_json(&json)?)
            }
        };

        // The format bounds the zone to 0..=60; 0 is the unspecified zone.
        let zone = u8::try_from(record.utm_zone_number)
            .ok()
            .and_then(|n| UtmZone::new(n, record.northern_hemisphere).ok());

        Ok(Self {
            origin: DVec3::from_array(record.origin),
            zone,
            contents,
        })
    }

    pub fn to_bytes(&self, compress: bool) -> Result<Vec<u8>> {
        Ok(utmt::encode_utmt(&self.to_record()?, compress)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_record(utmt::parse_utmt_bytes(bytes)?)
    }
}
