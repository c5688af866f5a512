// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

type Name = flexstr::SharedStr;

/// A cheaply cloneable stack frame identity, a `(class, method)` pair.
///
/// Frames compare and hash by content on both fields. They discriminate
/// children during sample insertion and name the inferred spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frame {
    class: Name,
    method: Name,
}

impl Frame {
    /// Create a frame from its class and method names.
    pub fn new(class: impl AsRef<str>, method: impl AsRef<str>) -> Self {
        Self {
            class: Name::from_ref(class),
            method: Name::from_ref(method),
        }
    }

    /// The class (or module) component.
    pub fn class_name(&self) -> &str {
        self.class.as_str()
    }

    /// The method component.
    pub fn method_name(&self) -> &str {
        self.method.as_str()
    }
}

/// Renders `Class#method`, or the bare method when the class is empty.
/// This is the conventional inferred span name.
impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.class.is_empty() {
            write!(f, "{}", self.method)
        } else {
            write!(f, "{}#{}", self.class, self.method)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_content() {
        assert_eq!(Frame::new("Foo", "bar"), Frame::new("Foo", "bar"));
        assert_ne!(Frame::new("Foo", "bar"), Frame::new("Foo", "baz"));
        assert_ne!(Frame::new("Foo", "bar"), Frame::new("Fop", "bar"));
    }

    #[test]
    fn test_span_name() {
        assert_eq!(Frame::new("Foo", "bar").to_string(), "Foo#bar");
        assert_eq!(Frame::new("", "main").to_string(), "main");
    }
}
