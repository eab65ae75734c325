use serde::{Deserialize, Serialize};

/// Layers compared when the caller does not name any.
pub const DEFAULT_LAYERS: &[&str] = &["F.Cu", "B.Cu", "F.SilkS", "B.SilkS"];

/// Ordered sequence of layer names.
///
/// Order determines the order of exported artifacts and report lines.
/// Duplicates are kept; they only cost redundant work.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerSet(Vec<String>);

impl LayerSet {
    /// Build a layer set from explicit names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Parse a whitespace or comma separated list of layer names.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|name| !name.is_empty()),
        )
    }

    /// Append `In1.Cu` through `In{count}.Cu`.
    #[must_use]
    pub fn with_inner_copper(mut self, count: u32) -> Self {
        self.0
            .extend((1..=count).map(|index| format!("In{index}.Cu")));
        self
    }

    /// Iterate the layer names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of entries, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no layer is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer names joined with `sep`, as external tools expect them.
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        self.0.join(sep)
    }
}

/// File-name friendly form of a layer name (`F.Cu` becomes `F_Cu`).
#[must_use]
pub fn layer_file_stem(layer: &str) -> String {
    layer.replace('.', "_")
}

/// Name of the PDF artifact a renderer exports for `layer` of `document_stem`.
#[must_use]
pub fn layer_artifact_name(document_stem: &str, layer: &str) -> String {
    format!("{document_stem}-{}.pdf", layer_file_stem(layer))
}
