//! An ordered naming scheme for model parameters.

use std::collections::HashMap;

/// Ordered parameter names with reverse lookup by name.
#[derive(Clone, Debug)]
pub struct ParameterNames {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ParameterNames {
    /// A default scheme: `xs[0]`, `xs[1]`, ...
    pub fn numbered(num_params: usize) -> Self {
        Self::named((0..num_params).map(|i| format!("xs[{}]", i)))
    }

    /// A scheme with the given names, in order.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let lookup = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, lookup }
    }

    /// Position of a name in the ordering.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The CSV header line for these parameters.
    pub fn csv_header(&self) -> String {
        self.names.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_names_look_like_indexing() {
        let names = ParameterNames::numbered(3);
        assert_eq!(names.csv_header(), "xs[0],xs[1],xs[2]");
        assert_eq!(names.index("xs[1]"), Some(1));
        assert_eq!(names.index("nope"), None);
    }

    #[test]
    fn named_scheme_preserves_order() {
        let names = ParameterNames::named(["m", "b", "sigma"]);
        assert_eq!(names.len(), 3);
        assert_eq!(names.csv_header(), "m,b,sigma");
        assert_eq!(names.index("sigma"), Some(2));
    }
}
