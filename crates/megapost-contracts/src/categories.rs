use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const FIDELITY_CLAUSE: &str = "It is CRUCIAL and MANDATORY that the product in the generated image is a PERFECT replica of the product in the provided image. Do NOT change its shape, color, texture, logos or any other detail. The product must be 100% faithful to the original.";

const GENERIC_INSTRUCTION: &str = "Generate an image using this product.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Lifestyle,
    Product,
    AngledProduct,
    Model,
    Gif,
    Story,
    TransparentBg,
}

impl Category {
    /// Canonical display and launch order.
    pub const ALL: [Category; 7] = [
        Category::Lifestyle,
        Category::Product,
        Category::AngledProduct,
        Category::Model,
        Category::Gif,
        Category::Story,
        Category::TransparentBg,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn tag(self) -> &'static str {
        match self {
            Category::Lifestyle => "lifestyle",
            Category::Product => "product",
            Category::AngledProduct => "angled_product",
            Category::Model => "model",
            Category::Gif => "gif",
            Category::Story => "story",
            Category::TransparentBg => "transparent_bg",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Category::Lifestyle => "Lifestyle",
            Category::Product => "Product Mockup",
            Category::AngledProduct => "Angled Mockup",
            Category::Model => "With Model",
            Category::Gif => "Dynamic Scene (GIF Style)",
            Category::Story => "Story (Insta and Whats)",
            Category::TransparentBg => "No Background (PNG)",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Category::Lifestyle => "Create a realistic, high-quality lifestyle photograph using this product. The scene must feel authentic, with the product naturally integrated into an everyday setting or being used by a person.",
            Category::Product => "Generate a clean, professional product photo (mockup) of this item, presenting it on a pedestal or minimalist surface (marble, concrete, light wood) against a neutral-colored background. Use studio lighting that highlights the product details.",
            Category::AngledProduct => "Generate a clean, professional product photo (mockup) of this item, captured from a dynamic angle that shows the depth and details of the product. Present the item on a minimalist surface (marble, concrete, light wood) against a neutral-colored background. Use studio lighting with soft shadows that enhance the shape of the product.",
            Category::Model => "Create a modern studio image of a stylish model interacting with the product in a positive, natural way. The background must be a solid, vibrant color that complements the product.",
            Category::Gif => "Create a still image that captures the energy and motion of an animated GIF. The scene must be dynamic and eye-catching, with vibrant colors and perhaps motion lines or a color-burst effect in the background.",
            Category::Story => "Create an attractive marketing image for Instagram and WhatsApp stories. The image must be vibrant, grab attention and leave clear space for adding text or logos. The format MUST be vertical (9:16 aspect ratio).",
            Category::TransparentBg => "Generate a product image with a perfectly transparent background. The output format MUST be PNG. The product must be completely isolated, with no shadows or reflections on the floor.",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Category::ALL
            .into_iter()
            .find(|category| category.tag() == normalized)
            .ok_or_else(|| {
                let known = Category::ALL.map(Category::tag).join(", ");
                format!("unknown category '{raw}' (expected one of: {known})")
            })
    }
}

pub fn prompt_for_category(category: Category) -> String {
    format!("{} {FIDELITY_CLAUSE}", category.instruction())
}

/// Unknown tags get the generic instruction; the fidelity clause is always present.
pub fn prompt_for_tag(tag: &str) -> String {
    match tag.parse::<Category>() {
        Ok(category) => prompt_for_category(category),
        Err(_) => format!("{GENERIC_INSTRUCTION} {FIDELITY_CLAUSE}"),
    }
}

/// `megapost_<title>.png` with whitespace runs collapsed to `_`.
pub fn download_file_name(category: Category) -> String {
    let title = category.title().split_whitespace().collect::<Vec<_>>().join("_");
    format!("megapost_{title}.png")
}

pub fn tile_file_name(category: Category) -> String {
    format!("{}_image.png", category.tag())
}

/// One slot per category, so every per-category view is exhaustive and fixed-size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTable<T> {
    pub lifestyle: T,
    pub product: T,
    pub angled_product: T,
    pub model: T,
    pub gif: T,
    pub story: T,
    pub transparent_bg: T,
}

impl<T> CategoryTable<T> {
    pub fn from_fn(mut f: impl FnMut(Category) -> T) -> Self {
        Self {
            lifestyle: f(Category::Lifestyle),
            product: f(Category::Product),
            angled_product: f(Category::AngledProduct),
            model: f(Category::Model),
            gif: f(Category::Gif),
            story: f(Category::Story),
            transparent_bg: f(Category::TransparentBg),
        }
    }

    pub fn get(&self, category: Category) -> &T {
        match category {
            Category::Lifestyle => &self.lifestyle,
            Category::Product => &self.product,
            Category::AngledProduct => &self.angled_product,
            Category::Model => &self.model,
            Category::Gif => &self.gif,
            Category::Story => &self.story,
            Category::TransparentBg => &self.transparent_bg,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut T {
        match category {
            Category::Lifestyle => &mut self.lifestyle,
            Category::Product => &mut self.product,
            Category::AngledProduct => &mut self.angled_product,
            Category::Model => &mut self.model,
            Category::Gif => &mut self.gif,
            Category::Story => &mut self.story,
            Category::TransparentBg => &mut self.transparent_bg,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &T)> + '_ {
        Category::ALL
            .into_iter()
            .map(move |category| (category, self.get(category)))
    }

    pub fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        self.iter().any(|(_, value)| predicate(value))
    }
}
