//! Page-tree walk.
//!
//! Depth-first over `/Root /Pages`, with `Resources`, `MediaBox`, `CropBox`
//! and `Rotate` inherited from ancestor `Pages` nodes.

use super::reader::PdfReader;
use crate::model::objects::{ObjRef, PdfDict, PdfValue};
use rustc_hash::FxHashSet;
use std::rc::Rc;
use tracing::warn;

/// Attributes a page inherits from its ancestors.
pub const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// A page with inherited attributes merged into its dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Zero-based position in document order
    pub index: usize,
    /// Reference of the page object
    pub obj_ref: ObjRef,
    pub dict: PdfDict,
}

impl Page {
    /// Media box as four numbers, when present and well formed.
    pub fn media_box(&self, reader: &PdfReader) -> Option<[f64; 4]> {
        let value = reader.resolve_key(&self.dict, "MediaBox");
        let arr = value.as_array().ok()?;
        if arr.len() != 4 {
            return None;
        }
        let mut out = [0.0; 4];
        for (slot, v) in out.iter_mut().zip(arr) {
            *slot = reader.get_object(v).as_num().ok()?;
        }
        Some(out)
    }

    pub fn rotate(&self) -> i64 {
        self.dict
            .get("Rotate")
            .and_then(|v| v.as_int().ok())
            .unwrap_or(0)
    }
}

/// Inherited attribute chain, one node per `Pages` level.
#[derive(Debug)]
struct InheritedNode {
    parent: Option<Rc<InheritedNode>>,
    attrs: Vec<(&'static str, PdfValue)>,
}

impl InheritedNode {
    fn from_dict(parent: Option<Rc<Self>>, dict: &PdfDict) -> Rc<Self> {
        let attrs = INHERITABLE
            .iter()
            .filter_map(|&key| dict.get(key).map(|v| (key, v.clone())))
            .collect();
        Rc::new(Self { parent, attrs })
    }

    fn resolve(&self, key: &str) -> Option<&PdfValue> {
        self.attrs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .or_else(|| self.parent.as_ref().and_then(|p| p.resolve(key)))
    }

    fn apply_to(&self, dest: &mut PdfDict) {
        for key in INHERITABLE {
            if !dest.contains_key(key)
                && let Some(value) = self.resolve(key)
            {
                dest.insert(key.to_string(), value.clone());
            }
        }
    }
}

impl PdfReader {
    /// Walk the page tree in document order.
    ///
    /// Each page is reported to the `on_page_read` observer, if one was
    /// configured. The observer is detached for the duration of the walk,
    /// so a walk started from inside it reports nothing. Broken nodes and
    /// cycles are skipped.
    pub fn pages(&self) -> Vec<Page> {
        let catalog = self.catalog();
        let Some(PdfValue::Reference(root)) = catalog.get("Pages").cloned() else {
            warn!("catalog has no /Pages reference");
            return Vec::new();
        };

        let mut observer = self.on_page_read.take();
        let mut stack = vec![(root, InheritedNode::from_dict(None, &PdfDict::new()))];
        let mut visited = FxHashSet::default();
        let mut pages = Vec::new();

        while let Some((node_ref, inherited)) = stack.pop() {
            if !visited.insert(node_ref.obj_num) {
                warn!(obj = node_ref.obj_num, "page tree cycle");
                continue;
            }

            let node = self.get(node_ref);
            let Ok(dict) = node.as_dict() else {
                continue;
            };

            match dict.get("Type").and_then(|t| t.as_name().ok()) {
                Some("Pages") => {
                    let inherited = InheritedNode::from_dict(Some(inherited), dict);
                    let kids = self.resolve_key(dict, "Kids");
                    if let Ok(kids) = kids.as_array() {
                        for kid in kids.iter().rev() {
                            if let Ok(kid) = kid.as_reference() {
                                stack.push((kid, Rc::clone(&inherited)));
                            }
                        }
                    }
                }
                Some("Page") => {
                    let mut dict = dict.clone();
                    inherited.apply_to(&mut dict);
                    let page = Page {
                        index: pages.len(),
                        obj_ref: node_ref,
                        dict,
                    };
                    if let Some(callback) = observer.as_mut() {
                        callback(page.index, &page.dict);
                    }
                    pages.push(page);
                }
                _ => {}
            }
        }

        if let Some(callback) = observer {
            self.on_page_read.borrow_mut().get_or_insert(callback);
        }
        pages
    }

    /// Number of pages reachable from the page tree.
    pub fn page_count(&self) -> usize {
        self.pages().len()
    }
}
