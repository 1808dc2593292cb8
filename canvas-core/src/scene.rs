//! The scene: an ordered list of canvas elements.
//!
//! Z-order is the list order (later is on top). Mutations take the affected
//! element by value and put back its replacement so an update is always a
//! whole-element swap keyed by [`ElementKey`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::element::{CanvasElement, ElementKey};
use crate::geometry::{Point, Rect};
use crate::{CanvasError, CanvasResult};

/// A scene containing all canvas elements in z-order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    elements: Vec<CanvasElement>,
    /// Next `@imgN` reference id to hand out.
    next_ref_id: u32,
}

impl Scene {
    /// Create a new empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            next_ref_id: 1,
        }
    }

    /// Build a scene from elements already in z-order.
    ///
    /// Later duplicates of a key are dropped. `next_ref_id` is raised above
    /// every reference id present.
    #[must_use]
    pub fn from_elements(elements: Vec<CanvasElement>, next_ref_id: u32) -> Self {
        let mut seen = HashSet::new();
        let elements: Vec<_> = elements
            .into_iter()
            .filter(|el| {
                let fresh = seen.insert(el.key.clone());
                if !fresh {
                    tracing::warn!("Dropping duplicate element key {}", el.key);
                }
                fresh
            })
            .collect();
        let max_ref = elements.iter().filter_map(|el| el.ref_id).max().unwrap_or(0);
        Self {
            elements,
            next_ref_id: next_ref_id.max(max_ref + 1).max(1),
        }
    }

    /// Add an element on top of the scene.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::DuplicateKey`] if the key is already present.
    pub fn insert(&mut self, element: CanvasElement) -> CanvasResult<ElementKey> {
        if self.contains(&element.key) {
            return Err(CanvasError::DuplicateKey(element.key.to_string()));
        }
        let key = element.key.clone();
        self.elements.push(element);
        Ok(key)
    }

    /// Remove an element from the scene.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn remove(&mut self, key: &ElementKey) -> CanvasResult<CanvasElement> {
        let idx = self
            .index_of(key)
            .ok_or_else(|| CanvasError::ElementNotFound(key.to_string()))?;
        Ok(self.elements.remove(idx))
    }

    /// Remove every element whose key is in `keys`. Returns how many were removed.
    pub fn remove_all(&mut self, keys: &[ElementKey]) -> usize {
        let before = self.elements.len();
        self.elements.retain(|el| !keys.contains(&el.key));
        before - self.elements.len()
    }

    /// Replace an element with the result of `f`.
    ///
    /// The replacement keeps the original key and z-position whatever `f`
    /// does to the key field.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn replace_with<F>(&mut self, key: &ElementKey, f: F) -> CanvasResult<()>
    where
        F: FnOnce(CanvasElement) -> CanvasElement,
    {
        let idx = self
            .index_of(key)
            .ok_or_else(|| CanvasError::ElementNotFound(key.to_string()))?;
        let current = self.elements[idx].clone();
        let mut next = f(current);
        next.key = key.clone();
        self.elements[idx] = next;
        Ok(())
    }

    /// Get an element by key.
    #[must_use]
    pub fn get(&self, key: &ElementKey) -> Option<&CanvasElement> {
        self.elements.iter().find(|el| &el.key == key)
    }

    /// Check whether an element exists.
    #[must_use]
    pub fn contains(&self, key: &ElementKey) -> bool {
        self.get(key).is_some()
    }

    /// Z-position of an element.
    #[must_use]
    pub fn index_of(&self, key: &ElementKey) -> Option<usize> {
        self.elements.iter().position(|el| &el.key == key)
    }

    /// All elements, bottom to top.
    #[must_use]
    pub fn elements(&self) -> &[CanvasElement] {
        &self.elements
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the scene is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Remove every element. Reference ids are not recycled.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Next reference id that will be assigned.
    #[must_use]
    pub fn next_ref_id(&self) -> u32 {
        self.next_ref_id.max(1)
    }

    /// Return the element's `@imgN` id, assigning the next one if it has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn ensure_ref_id(&mut self, key: &ElementKey) -> CanvasResult<u32> {
        let idx = self
            .index_of(key)
            .ok_or_else(|| CanvasError::ElementNotFound(key.to_string()))?;
        if let Some(id) = self.elements[idx].ref_id {
            return Ok(id);
        }
        let id = self.next_ref_id();
        self.next_ref_id = id + 1;
        self.elements[idx].ref_id = Some(id);
        Ok(id)
    }

    /// Find the element carrying a reference id.
    #[must_use]
    pub fn by_ref_id(&self, ref_id: u32) -> Option<&CanvasElement> {
        self.elements.iter().find(|el| el.ref_id == Some(ref_id))
    }

    /// Topmost element containing a world point.
    #[must_use]
    pub fn element_at(&self, p: Point) -> Option<&CanvasElement> {
        self.elements.iter().rev().find(|el| el.contains_point(p))
    }

    /// Keys of every element whose box intersects `rect`, in z-order.
    #[must_use]
    pub fn keys_intersecting(&self, rect: &Rect) -> Vec<ElementKey> {
        self.elements
            .iter()
            .filter(|el| el.rect().intersects(rect))
            .map(|el| el.key.clone())
            .collect()
    }

    /// Boxes of every element.
    #[must_use]
    pub fn rects(&self) -> Vec<Rect> {
        self.elements.iter().map(CanvasElement::rect).collect()
    }

    /// Bounding box of the whole scene.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect> {
        Rect::bounding(self.rects())
    }

    // -----------------------------------------------------------------------
    // Layer ordering
    // -----------------------------------------------------------------------

    /// Move each selected element one step up, past an unselected neighbour.
    ///
    /// Returns true if anything moved.
    pub fn move_up(&mut self, keys: &[ElementKey]) -> bool {
        let mut changed = false;
        for i in (0..self.elements.len().saturating_sub(1)).rev() {
            if keys.contains(&self.elements[i].key) && !keys.contains(&self.elements[i + 1].key) {
                self.elements.swap(i, i + 1);
                changed = true;
            }
        }
        changed
    }

    /// Move each selected element one step down, past an unselected neighbour.
    pub fn move_down(&mut self, keys: &[ElementKey]) -> bool {
        let mut changed = false;
        for i in 1..self.elements.len() {
            if keys.contains(&self.elements[i].key) && !keys.contains(&self.elements[i - 1].key) {
                self.elements.swap(i, i - 1);
                changed = true;
            }
        }
        changed
    }

    /// Move the selected elements to the top, keeping their relative order.
    pub fn bring_to_front(&mut self, keys: &[ElementKey]) -> bool {
        let before: Vec<_> = self.elements.iter().map(|el| el.key.clone()).collect();
        let (picked, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.elements)
            .into_iter()
            .partition(|el| keys.contains(&el.key));
        self.elements = rest;
        self.elements.extend(picked);
        self.elements.iter().map(|el| &el.key).ne(before.iter())
    }

    /// Move the selected elements to the bottom, keeping their relative order.
    pub fn send_to_back(&mut self, keys: &[ElementKey]) -> bool {
        let before: Vec<_> = self.elements.iter().map(|el| el.key.clone()).collect();
        let (mut picked, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.elements)
            .into_iter()
            .partition(|el| keys.contains(&el.key));
        picked.extend(rest);
        self.elements = picked;
        self.elements.iter().map(|el| &el.key).ne(before.iter())
    }
}
