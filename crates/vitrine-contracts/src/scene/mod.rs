mod image;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};

pub use image::{AspectRatio, ImageData};

/// At most this many of the limited slots (bg, cloth, acc, prod) may hold an
/// image at the same time.
pub const LIMITED_SLOT_IMAGE_CAP: usize = 3;

/// Number of unlabeled reference images in quick mode.
pub const QUICK_IMAGE_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotId {
    #[serde(rename = "char")]
    Character,
    #[serde(rename = "bg")]
    Background,
    #[serde(rename = "cloth")]
    Clothing,
    #[serde(rename = "acc")]
    Accessory,
    #[serde(rename = "prod")]
    Product,
    #[serde(rename = "ref")]
    StyleReference,
}

impl SlotId {
    pub const ALL: [SlotId; 6] = [
        SlotId::Character,
        SlotId::Background,
        SlotId::Clothing,
        SlotId::Accessory,
        SlotId::Product,
        SlotId::StyleReference,
    ];

    /// Slots composed individually into a scene, in attachment order.
    pub const SCENE_ORDER: [SlotId; 5] = [
        SlotId::Character,
        SlotId::Background,
        SlotId::Clothing,
        SlotId::Accessory,
        SlotId::Product,
    ];

    pub const LIMITED: [SlotId; 4] = [
        SlotId::Background,
        SlotId::Clothing,
        SlotId::Accessory,
        SlotId::Product,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SlotId::Character => "char",
            SlotId::Background => "bg",
            SlotId::Clothing => "cloth",
            SlotId::Accessory => "acc",
            SlotId::Product => "prod",
            SlotId::StyleReference => "ref",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SlotId::Character => "Character",
            SlotId::Background => "Background",
            SlotId::Clothing => "Clothing",
            SlotId::Accessory => "Accessory",
            SlotId::Product => "Product",
            SlotId::StyleReference => "Style Reference",
        }
    }

    pub fn is_limited(&self) -> bool {
        Self::LIMITED.contains(self)
    }

    /// Slots whose reference image should only contribute the item, not the
    /// person wearing it.
    pub fn is_item(&self) -> bool {
        matches!(
            self,
            SlotId::Clothing | SlotId::Accessory | SlotId::Product
        )
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|slot| {
                slot.key() == normalized || slot.title().to_ascii_lowercase() == normalized
            })
            .ok_or_else(|| format!("unknown slot '{raw}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    FullBody,
    ThreeQuarter,
    MediumShot,
    CloseUp,
}

impl Framing {
    pub fn label(&self) -> &'static str {
        match self {
            Framing::FullBody => "full body",
            Framing::ThreeQuarter => "three-quarter body",
            Framing::MediumShot => "medium shot, waist up",
            Framing::CloseUp => "close-up portrait",
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "full_body" | "full" => Ok(Framing::FullBody),
            "three_quarter" | "american" => Ok(Framing::ThreeQuarter),
            "medium_shot" | "medium" => Ok(Framing::MediumShot),
            "close_up" | "closeup" => Ok(Framing::CloseUp),
            _ => Err(format!("unknown framing '{raw}'")),
        }
    }
}

/// One scene ingredient. `image` and `text` are independently optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentSlot {
    #[serde(default)]
    pub image: Option<ImageData>,
    #[serde(default)]
    pub text: String,
}

impl ComponentSlot {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_image() && !self.has_text()
    }
}

/// Deep copy of the character slot, as kept by the character library.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    #[serde(flatten)]
    pub slot: ComponentSlot,
    #[serde(default)]
    pub framing: Framing,
}

impl CharacterSnapshot {
    pub fn is_empty(&self) -> bool {
        self.slot.is_empty()
    }
}

/// Scene Component Store: per-slot image/text state for the advanced mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SceneComponents {
    #[serde(default, rename = "char")]
    pub character: ComponentSlot,
    #[serde(default)]
    pub framing: Framing,
    #[serde(default, rename = "bg")]
    pub background: ComponentSlot,
    #[serde(default, rename = "cloth")]
    pub clothing: ComponentSlot,
    #[serde(default, rename = "acc")]
    pub accessory: ComponentSlot,
    #[serde(default, rename = "prod")]
    pub product: ComponentSlot,
    #[serde(default, rename = "ref")]
    pub style_reference: ComponentSlot,
}

impl SceneComponents {
    pub fn slot(&self, id: SlotId) -> &ComponentSlot {
        match id {
            SlotId::Character => &self.character,
            SlotId::Background => &self.background,
            SlotId::Clothing => &self.clothing,
            SlotId::Accessory => &self.accessory,
            SlotId::Product => &self.product,
            SlotId::StyleReference => &self.style_reference,
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut ComponentSlot {
        match id {
            SlotId::Character => &mut self.character,
            SlotId::Background => &mut self.background,
            SlotId::Clothing => &mut self.clothing,
            SlotId::Accessory => &mut self.accessory,
            SlotId::Product => &mut self.product,
            SlotId::StyleReference => &mut self.style_reference,
        }
    }

    /// False iff `id` is a limited slot without an image while the other
    /// limited slots already hold the cap.
    pub fn can_accept_image(&self, id: SlotId) -> bool {
        if !id.is_limited() || self.slot(id).has_image() {
            return true;
        }
        self.limited_image_count() < LIMITED_SLOT_IMAGE_CAP
    }

    pub fn limited_image_count(&self) -> usize {
        SlotId::LIMITED
            .iter()
            .filter(|id| self.slot(**id).has_image())
            .count()
    }

    pub fn set_image(&mut self, id: SlotId, image: ImageData) -> StudioResult<()> {
        if !self.can_accept_image(id) {
            return Err(StudioError::CapacityExceeded {
                slot: id,
                limit: LIMITED_SLOT_IMAGE_CAP,
            });
        }
        self.slot_mut(id).image = Some(image);
        Ok(())
    }

    pub fn set_text(&mut self, id: SlotId, text: impl Into<String>) {
        self.slot_mut(id).text = text.into();
    }

    pub fn remove_image(&mut self, id: SlotId) {
        self.slot_mut(id).image = None;
    }

    pub fn clear(&mut self, id: SlotId) {
        *self.slot_mut(id) = ComponentSlot::default();
        if id == SlotId::Character {
            self.framing = Framing::default();
        }
    }

    pub fn clear_all(&mut self) {
        *self = Self::default();
    }

    pub fn read_all(&self) -> IndexMap<SlotId, ComponentSlot> {
        SlotId::ALL
            .into_iter()
            .map(|id| (id, self.slot(id).clone()))
            .collect()
    }

    /// Whether any scene slot (style reference excluded) carries content.
    pub fn has_scene_content(&self) -> bool {
        SlotId::SCENE_ORDER
            .iter()
            .any(|id| !self.slot(*id).is_empty())
    }

    pub fn character_snapshot(&self) -> CharacterSnapshot {
        CharacterSnapshot {
            slot: self.character.clone(),
            framing: self.framing,
        }
    }

    pub fn restore_character(&mut self, snapshot: &CharacterSnapshot) {
        self.character = snapshot.slot.clone();
        self.framing = snapshot.framing;
    }
}

/// One-shot auxiliary images, consumed by the next generation call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuxSlots {
    #[serde(default)]
    new_character_face: Option<ImageData>,
    #[serde(default)]
    pose_reference: Option<ImageData>,
}

impl AuxSlots {
    pub fn set_new_character_face(&mut self, image: ImageData) {
        self.new_character_face = Some(image);
    }

    pub fn set_pose_reference(&mut self, image: ImageData) {
        self.pose_reference = Some(image);
    }

    pub fn new_character_face(&self) -> Option<&ImageData> {
        self.new_character_face.as_ref()
    }

    pub fn pose_reference(&self) -> Option<&ImageData> {
        self.pose_reference.as_ref()
    }

    pub fn take_new_character_face(&mut self) -> Option<ImageData> {
        self.new_character_face.take()
    }

    pub fn take_pose_reference(&mut self) -> Option<ImageData> {
        self.pose_reference.take()
    }
}

/// Quick-mode inputs: free-text scene plus unlabeled references.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuickScene {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reference_images: [Option<ImageData>; QUICK_IMAGE_SLOTS],
    #[serde(default)]
    pub edit_images: [Option<ImageData>; QUICK_IMAGE_SLOTS],
}

impl QuickScene {
    pub fn set_reference_image(&mut self, index: usize, image: Option<ImageData>) -> StudioResult<()> {
        let slot = self.reference_images.get_mut(index).ok_or_else(|| {
            StudioError::invalid(format!(
                "quick reference index {index} out of range (0..{QUICK_IMAGE_SLOTS})"
            ))
        })?;
        *slot = image;
        Ok(())
    }

    pub fn set_edit_image(&mut self, index: usize, image: Option<ImageData>) -> StudioResult<()> {
        let slot = self.edit_images.get_mut(index).ok_or_else(|| {
            StudioError::invalid(format!(
                "quick edit index {index} out of range (0..{QUICK_IMAGE_SLOTS})"
            ))
        })?;
        *slot = image;
        Ok(())
    }

    pub fn references(&self) -> Vec<ImageData> {
        self.reference_images.iter().flatten().cloned().collect()
    }

    pub fn edit_references(&self) -> Vec<ImageData> {
        self.edit_images.iter().flatten().cloned().collect()
    }

    pub fn has_images(&self) -> bool {
        self.reference_images.iter().any(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::{AuxSlots, ImageData, SceneComponents, SlotId};
    use crate::error::StudioError;

    fn img(tag: u8) -> ImageData {
        ImageData::new(vec![tag; 4])
    }

    #[test]
    fn capacity_check_matches_limited_slot_rule() {
        // Every subset of the four limited slots, every target slot.
        for mask in 0u8..16 {
            if mask.count_ones() > 3 {
                continue;
            }
            let mut scene = SceneComponents::default();
            for (bit, id) in SlotId::LIMITED.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    scene.set_image(*id, img(bit as u8)).unwrap();
                }
            }
            let filled = mask.count_ones() as usize;
            for (bit, id) in SlotId::LIMITED.iter().enumerate() {
                let target_has_image = mask & (1 << bit) != 0;
                let expected = !(filled == 3 && !target_has_image);
                assert_eq!(scene.can_accept_image(*id), expected, "mask {mask:04b} slot {id}");
            }
        }
    }

    #[test]
    fn fourth_limited_image_is_rejected() {
        let mut scene = SceneComponents::default();
        scene.set_image(SlotId::Background, img(1)).unwrap();
        scene.set_image(SlotId::Clothing, img(2)).unwrap();
        scene.set_image(SlotId::Accessory, img(3)).unwrap();
        let err = scene.set_image(SlotId::Product, img(4)).unwrap_err();
        assert_eq!(
            err,
            StudioError::CapacityExceeded {
                slot: SlotId::Product,
                limit: 3
            }
        );
        assert!(!scene.product.has_image());

        // Replacing an existing image and unlimited slots still work.
        scene.set_image(SlotId::Clothing, img(9)).unwrap();
        scene.set_image(SlotId::Character, img(5)).unwrap();
        scene.set_image(SlotId::StyleReference, img(6)).unwrap();
    }

    #[test]
    fn clear_character_resets_framing() {
        let mut scene = SceneComponents::default();
        scene.set_text(SlotId::Character, "woman, red hair");
        scene.framing = super::Framing::CloseUp;
        scene.clear(SlotId::Character);
        assert!(scene.character.is_empty());
        assert_eq!(scene.framing, super::Framing::FullBody);
    }

    #[test]
    fn read_all_lists_every_slot_in_order() {
        let mut scene = SceneComponents::default();
        scene.set_text(SlotId::Background, "rooftop at dusk");
        let all = scene.read_all();
        let keys: Vec<&str> = all.keys().map(SlotId::key).collect();
        assert_eq!(keys, vec!["char", "bg", "cloth", "acc", "prod", "ref"]);
        assert_eq!(all[&SlotId::Background].text, "rooftop at dusk");
    }

    #[test]
    fn aux_take_returns_and_clears() {
        let mut aux = AuxSlots::default();
        aux.set_pose_reference(img(7));
        assert_eq!(aux.take_pose_reference(), Some(img(7)));
        assert_eq!(aux.take_pose_reference(), None);
        assert!(aux.new_character_face().is_none());
    }

    #[test]
    fn scene_serializes_with_short_slot_keys() -> anyhow::Result<()> {
        let mut scene = SceneComponents::default();
        scene.set_text(SlotId::Clothing, "linen suit");
        let value = serde_json::to_value(&scene)?;
        assert_eq!(value["cloth"]["text"], "linen suit");
        assert_eq!(value["framing"], "full_body");
        Ok(())
    }
}
