use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw image bytes. Serialized as a base64 string so project snapshots stay
/// plain JSON.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ImageData(Vec<u8>);

impl ImageData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let trimmed = encoded.trim();
        let payload = trimmed
            .split_once(";base64,")
            .map(|(_, data)| data)
            .unwrap_or(trimmed);
        Ok(Self(BASE64.decode(payload.as_bytes())?))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn mime_type(&self) -> &'static str {
        let bytes = self.0.as_slice();
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            "image/png"
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "image/jpeg"
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            "image/webp"
        } else if bytes.starts_with(b"GIF8") {
            "image/gif"
        } else {
            "image/png"
        }
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageData({} bytes, {})", self.0.len(), self.mime_type())
    }
}

impl From<Vec<u8>> for ImageData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_base64(&raw).map_err(serde::de::Error::custom)
    }
}

/// Target output format such as `1:1` or `16:9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    width: u32,
    height: u32,
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::SQUARE
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "square" => return Ok(Self::SQUARE),
            "portrait" | "story" => return Ok(Self { width: 9, height: 16 }),
            "landscape" | "wide" => return Ok(Self { width: 16, height: 9 }),
            _ => {}
        }
        let (left, right) = normalized
            .split_once(':')
            .or_else(|| normalized.split_once('x'))
            .ok_or_else(|| format!("invalid aspect ratio '{raw}'"))?;
        let width = left
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid aspect ratio '{raw}'"))?;
        let height = right
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid aspect ratio '{raw}'"))?;
        Self::new(width, height).ok_or_else(|| format!("invalid aspect ratio '{raw}'"))
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AspectRatio, ImageData};

    #[test]
    fn image_data_serializes_as_base64() -> anyhow::Result<()> {
        let image = ImageData::new(vec![0x89, b'P', b'N', b'G', 1, 2]);
        let value = serde_json::to_value(&image)?;
        assert_eq!(value, json!("iVBORwEC"));
        let back: ImageData = serde_json::from_value(value)?;
        assert_eq!(back, image);
        assert_eq!(back.mime_type(), "image/png");
        Ok(())
    }

    #[test]
    fn image_data_accepts_data_urls() -> anyhow::Result<()> {
        let image = ImageData::from_base64("data:image/jpeg;base64,/9j/4A==")?;
        assert_eq!(image.mime_type(), "image/jpeg");
        Ok(())
    }

    #[test]
    fn aspect_ratio_parses_common_forms() {
        assert_eq!("16:9".parse::<AspectRatio>().map(|r| r.to_string()), Ok("16:9".to_string()));
        assert_eq!(" 4x5 ".parse::<AspectRatio>().map(|r| r.to_string()), Ok("4:5".to_string()));
        assert_eq!("portrait".parse::<AspectRatio>().map(|r| r.to_string()), Ok("9:16".to_string()));
        assert!("0:1".parse::<AspectRatio>().is_err());
        assert!("wat".parse::<AspectRatio>().is_err());
    }
}
