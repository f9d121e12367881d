//! Known-safe rewrites that make a flattened WSDL digestible by zeep, which does not support
//! substitution groups (<https://github.com/mvantellingen/python-zeep/issues/321>).
//!
//! Values are compared in Clark notation, so the patches must run before prefixes are restored.

use lazy_static::lazy_static;
use log::debug;

use crate::{
    document::Document,
    names::{ExpandedName, NIEM_CORE_NAMESPACE},
};

/// Replaces the `ref` of matching elements inside a named container element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefPatch {
    pub container: ExpandedName,
    /// Value of the container's `name` attribute.
    pub container_name: String,
    pub element: ExpandedName,
    pub current_ref: ExpandedName,
    pub replacement: ExpandedName,
}

lazy_static! {
    pub static ref ZEEP_PATCHES: Vec<RefPatch> = vec![RefPatch {
        container: ExpandedName::xsd("complexType"),
        container_name: "DateType".to_string(),
        element: ExpandedName::xsd("element"),
        current_ref: ExpandedName::with_namespace(NIEM_CORE_NAMESPACE, "DateRepresentation"),
        replacement: ExpandedName::with_namespace(NIEM_CORE_NAMESPACE, "DateTime"),
    }];
}

impl RefPatch {
    /// Returns the number of elements changed.
    pub fn apply(&self, document: &mut Document) -> usize {
        let root = document.root();
        let mut targets = Vec::new();
        for container in document.descendants(root).into_iter().skip(1) {
            let Some(element) = document.element(container) else {
                continue;
            };
            if element.name != self.container
                || element.attribute("name") != Some(self.container_name.as_str())
            {
                continue;
            }
            for node in document.descendants(container).into_iter().skip(1) {
                let matches = document.element(node).is_some_and(|e| {
                    e.name == self.element
                        && e.attribute("ref").map(ExpandedName::from_clark).as_ref()
                            == Some(&self.current_ref)
                });
                if matches && !targets.contains(&node) {
                    targets.push(node);
                }
            }
        }
        for &node in &targets {
            if let Some(element) = document.element_mut(node) {
                element.set_attribute(ExpandedName::local("ref"), self.replacement.to_string());
            }
        }
        debug!(
            "{} {:?} // {} ref={} -> {}: {}",
            self.container,
            self.container_name,
            self.element,
            self.current_ref,
            self.replacement,
            targets.len()
        );
        targets.len()
    }
}

pub fn apply_patches(document: &mut Document, patches: &[RefPatch]) -> usize {
    patches.iter().map(|patch| patch.apply(document)).sum()
}
