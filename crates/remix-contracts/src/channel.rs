use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Blocks requested per contents page.
pub const PAGE_SIZE: usize = 20;

/// Maximum number of images that may be selected as references at once.
pub const SELECTION_LIMIT: usize = 10;

pub const IMAGE_BLOCK_CLASS: &str = "Image";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub total_length: Option<u64>,
}

impl Channel {
    /// Reads the channel metadata document. Contents are not part of it.
    pub fn from_metadata(payload: &Value) -> Self {
        Self {
            id: payload.get("id").and_then(Value::as_u64).unwrap_or_default(),
            title: payload
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            slug: payload
                .get("slug")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: payload
                .get("metadata")
                .and_then(|metadata| metadata.get("description"))
                .and_then(Value::as_str)
                .map(str::to_string),
            total_length: payload.get("length").and_then(Value::as_u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub id: u64,
    pub title: Option<String>,
    pub display_url: String,
    pub thumb_url: String,
    pub original_url: String,
    pub class: String,
}

impl ImageBlock {
    fn from_value(block: &Value) -> Option<Self> {
        let class = block.get("class").and_then(Value::as_str)?;
        if class != IMAGE_BLOCK_CLASS {
            return None;
        }
        let image = block.get("image");
        let variant_url = |variant: &str| {
            image
                .and_then(|image| image.get(variant))
                .and_then(|entry| entry.get("url"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let display_url = variant_url("display");
        if display_url.is_empty() {
            return None;
        }
        Some(Self {
            id: block.get("id").and_then(Value::as_u64).unwrap_or_default(),
            title: block
                .get("title")
                .and_then(Value::as_str)
                .filter(|title| !title.is_empty())
                .map(str::to_string),
            display_url,
            thumb_url: variant_url("thumb"),
            original_url: variant_url("original"),
            class: class.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksPage {
    pub images: Vec<ImageBlock>,
    pub has_more: bool,
}

/// Parses one page of the channel contents endpoint.
///
/// The body is either a bare array of blocks or an object wrapping a
/// `contents` array. `has_more` follows the raw page length, not the number
/// of image blocks kept: a full page of non-image blocks still has more.
pub fn parse_blocks_page(payload: &Value) -> Result<BlocksPage> {
    let raw = match payload {
        Value::Array(rows) => rows,
        Value::Object(object) => match object.get("contents") {
            Some(Value::Array(rows)) => rows,
            _ => bail!("Invalid response format from Are.na."),
        },
        _ => bail!("Invalid response format from Are.na."),
    };

    Ok(BlocksPage {
        images: raw.iter().filter_map(ImageBlock::from_value).collect(),
        has_more: raw.len() == PAGE_SIZE,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableImage {
    pub id: u64,
    pub url: String,
    pub selected: bool,
    pub encoded: Option<EncodedImage>,
}

impl From<ImageBlock> for SelectableImage {
    fn from(block: ImageBlock) -> Self {
        Self {
            id: block.id,
            url: block.display_url,
            selected: false,
            encoded: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Selected,
    Deselected,
    LimitReached,
    NotFound,
}

/// Flips the selection flag of image `id`, refusing to select past
/// [`SELECTION_LIMIT`].
pub fn toggle_selection(images: &mut [SelectableImage], id: u64) -> ToggleOutcome {
    let selected_count = images.iter().filter(|image| image.selected).count();
    let Some(target) = images.iter_mut().find(|image| image.id == id) else {
        return ToggleOutcome::NotFound;
    };
    if target.selected {
        target.selected = false;
        return ToggleOutcome::Deselected;
    }
    if selected_count >= SELECTION_LIMIT {
        return ToggleOutcome::LimitReached;
    }
    target.selected = true;
    ToggleOutcome::Selected
}

pub fn selection_limit_message() -> String {
    format!("Maximum of {SELECTION_LIMIT} images can be selected.")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn image_block(id: u64) -> Value {
        json!({
            "id": id,
            "title": format!("block {id}"),
            "class": "Image",
            "image": {
                "display": {"url": format!("https://images.example/{id}/display.jpg")},
                "thumb": {"url": format!("https://images.example/{id}/thumb.jpg")},
                "original": {"url": format!("https://images.example/{id}/original.jpg")},
            }
        })
    }

    fn text_block(id: u64) -> Value {
        json!({"id": id, "class": "Text", "image": null, "content": "notes"})
    }

    fn selectable(count: u64) -> Vec<SelectableImage> {
        (1..=count)
            .map(|id| SelectableImage {
                id,
                url: format!("https://images.example/{id}.jpg"),
                selected: false,
                encoded: None,
            })
            .collect()
    }

    #[test]
    fn metadata_maps_description_and_length() {
        let channel = Channel::from_metadata(&json!({
            "id": 42,
            "title": "Field Notes",
            "slug": "field-notes",
            "length": 87,
            "metadata": {"description": "found textures"},
            "contents": [image_block(1)],
        }));
        assert_eq!(channel.id, 42);
        assert_eq!(channel.slug, "field-notes");
        assert_eq!(channel.description.as_deref(), Some("found textures"));
        assert_eq!(channel.total_length, Some(87));
    }

    #[test]
    fn accepts_bare_array_and_wrapped_contents() -> anyhow::Result<()> {
        let bare = parse_blocks_page(&json!([image_block(1), text_block(2)]))?;
        assert_eq!(bare.images.len(), 1);
        assert_eq!(bare.images[0].display_url, "https://images.example/1/display.jpg");
        assert!(!bare.has_more);

        let wrapped = parse_blocks_page(&json!({"contents": [image_block(3)], "length": 1}))?;
        assert_eq!(wrapped.images[0].id, 3);
        Ok(())
    }

    #[test]
    fn rejects_unknown_shapes() {
        for payload in [json!({"blocks": []}), json!("oops"), json!({"contents": {}})] {
            let err = parse_blocks_page(&payload).err().map(|err| err.to_string());
            assert_eq!(err.as_deref(), Some("Invalid response format from Are.na."));
        }
    }

    #[test]
    fn has_more_follows_raw_page_length() -> anyhow::Result<()> {
        let full_of_text: Vec<Value> = (0..PAGE_SIZE as u64).map(text_block).collect();
        let page = parse_blocks_page(&Value::Array(full_of_text))?;
        assert!(page.images.is_empty());
        assert!(page.has_more);

        let mut mixed: Vec<Value> = (0..10).map(image_block).collect();
        mixed.extend((10..PAGE_SIZE as u64).map(text_block));
        let page = parse_blocks_page(&Value::Array(mixed))?;
        assert_eq!(page.images.len(), 10);
        assert!(page.has_more);

        let short: Vec<Value> = (0..(PAGE_SIZE as u64 - 1)).map(image_block).collect();
        let page = parse_blocks_page(&Value::Array(short))?;
        assert_eq!(page.images.len(), PAGE_SIZE - 1);
        assert!(!page.has_more);
        Ok(())
    }

    #[test]
    fn image_blocks_without_display_url_are_dropped() -> anyhow::Result<()> {
        let page = parse_blocks_page(&json!([
            {"id": 1, "class": "Image", "image": null},
            {"id": 2, "class": "Image", "image": {"display": {"url": ""}}},
            image_block(3),
        ]))?;
        let ids: Vec<u64> = page.images.iter().map(|block| block.id).collect();
        assert_eq!(ids, vec![3]);
        Ok(())
    }

    #[test]
    fn tenth_selection_succeeds_and_eleventh_is_rejected() {
        let mut images = selectable(11);
        for id in 1..=9 {
            assert_eq!(toggle_selection(&mut images, id), ToggleOutcome::Selected);
        }
        assert_eq!(toggle_selection(&mut images, 10), ToggleOutcome::Selected);
        assert_eq!(toggle_selection(&mut images, 11), ToggleOutcome::LimitReached);
        assert_eq!(images.iter().filter(|image| image.selected).count(), SELECTION_LIMIT);
        assert!(!images[10].selected);

        assert_eq!(toggle_selection(&mut images, 3), ToggleOutcome::Deselected);
        assert_eq!(toggle_selection(&mut images, 11), ToggleOutcome::Selected);
        assert_eq!(toggle_selection(&mut images, 99), ToggleOutcome::NotFound);
        assert_eq!(selection_limit_message(), "Maximum of 10 images can be selected.");
    }
}
