//! Page geometry and low-level document helpers.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Convert centimeters to PDF points (1 cm = 72 / 2.54 pt).
#[must_use]
pub fn cm_to_pt(cm: f64) -> f64 {
    cm * 72.0 / 2.54
}

/// Axis-aligned rectangle in PDF user space (y grows upward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    #[must_use]
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    #[must_use]
    pub fn padded(&self, pad: f64) -> Self {
        Self {
            x0: self.x0 - pad,
            y0: self.y0 - pad,
            x1: self.x1 + pad,
            y1: self.y1 + pad,
        }
    }

    /// Largest square centered inside this rectangle.
    #[must_use]
    pub fn centered_square(&self) -> Self {
        let side = self.width().min(self.height());
        let cx = (self.x0 + self.x1) / 2.0;
        let cy = (self.y0 + self.y1) / 2.0;
        Self {
            x0: cx - side / 2.0,
            y0: cy - side / 2.0,
            x1: cx + side / 2.0,
            y1: cy + side / 2.0,
        }
    }

    #[must_use]
    pub fn is_landscape(&self) -> bool {
        self.width() > self.height()
    }
}

/// Build a numeric object. Kept in one place so the conversion into the
/// library's real representation is centralized.
#[must_use]
pub fn num(value: f64) -> Object {
    #[allow(clippy::cast_possible_truncation, trivial_numeric_casts)]
    let real = value as _;
    Object::Real(real)
}

/// Numeric value of an object, if it is one.
#[must_use]
pub fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => {
            #[allow(clippy::cast_precision_loss)]
            let value = *i as f64;
            Some(value)
        }
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Follow a reference one level; non-references pass through.
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    if let Object::Reference(id) = object {
        doc.get_object(*id).unwrap_or(object)
    } else {
        object
    }
}

fn parent_of(dict: &Dictionary) -> Option<ObjectId> {
    match dict.get(b"Parent") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    }
}

/// The page's MediaBox, following the Pages-tree inheritance chain.
///
/// Falls back to US Letter when the document carries no MediaBox at all.
#[must_use]
pub fn media_box(doc: &Document, page_id: ObjectId) -> Rect {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        if let Ok(raw) = dict.get(b"MediaBox") {
            if let Ok(values) = resolve(doc, raw).as_array() {
                let nums: Vec<f64> = values
                    .iter()
                    .filter_map(|v| number(resolve(doc, v)))
                    .collect();
                if nums.len() == 4 {
                    return Rect::new(nums[0], nums[1], nums[2], nums[3]);
                }
            }
        }
        current = parent_of(dict);
    }
    Rect::new(0.0, 0.0, 612.0, 792.0)
}

/// Resolved (possibly inherited) Resources dictionary for a page, cloned.
fn resolved_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        if let Ok(raw) = dict.get(b"Resources") {
            if let Ok(resources) = resolve(doc, raw).as_dict() {
                return resources.clone();
            }
        }
        current = parent_of(dict);
    }
    Dictionary::new()
}

/// Register `value` under `category` in the page's resources and return the
/// chosen resource name. The page ends up with a direct Resources dict, so
/// inherited resources are materialized rather than mutated in place.
pub fn add_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    name_prefix: &str,
    value: Object,
) -> Result<String, lopdf::Error> {
    let mut resources = resolved_resources(doc, page_id);
    let mut category_dict = match resources.get(category.as_bytes()) {
        Ok(raw) => match resolve(doc, raw).as_dict() {
            Ok(dict) => dict.clone(),
            Err(_) => Dictionary::new(),
        },
        Err(_) => Dictionary::new(),
    };

    let mut n = category_dict.len();
    let name = loop {
        let candidate = format!("{name_prefix}{n}");
        if !category_dict.has(candidate.as_bytes()) {
            break candidate;
        }
        n += 1;
    };
    category_dict.set(name.clone(), value);
    resources.set(category, Object::Dictionary(category_dict));

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// Append operations to the end of a page's content stream.
pub fn append_operations(
    doc: &mut Document,
    page_id: ObjectId,
    ops: Vec<Operation>,
) -> Result<(), lopdf::Error> {
    let data = doc.get_page_content(page_id)?;
    let mut content = Content::decode(&data)?;
    content.operations.extend(ops);
    let encoded = content.encode()?;
    doc.change_page_content(page_id, encoded)
}
