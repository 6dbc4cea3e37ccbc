use std::cmp::Ordering;

/// Choice → share (percent), kept ordered by share descending, then key
/// ascending. The order is what makes top-K picks reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    entries: Vec<(String, f64)>,
}

/// Descending share, ties broken by lexical order of the key
pub fn by_share_then_key(a: &(String, f64), b: &(String, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

impl Distribution {
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, f64)>) -> Self {
        let mut entries: Vec<(String, f64)> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        entries.sort_by(by_share_then_key);
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }
}

/// Every per-entity distribution carried by the detailed listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distributions {
    pub abilities: Distribution,
    pub items: Distribution,
    pub tera_types: Distribution,
    /// Keys look like `Careful:252/4/0/0/252/0`
    pub spreads: Distribution,
    pub natures: Distribution,
    /// Percent of sets carrying the move
    pub moves: Distribution,
}

/// Intermediate per-entity statistics for one snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUsageRecord {
    pub name: String,
    /// In [0, 100]
    pub usage_percent: f64,
    pub raw_count: Option<f64>,
    pub distributions: Distributions,
}

impl EntityUsageRecord {
    /// A ranking-only entity with no detail available
    pub fn usage_only(name: impl Into<String>, usage_percent: f64) -> Self {
        Self {
            name: name.into(),
            usage_percent,
            raw_count: None,
            distributions: Distributions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_orders_by_share_then_key() {
        let dist = Distribution::new(vec![
            ("Sitrus Berry", 20.0),
            ("Assault Vest", 20.0),
            ("Choice Scarf", 35.5),
            ("Leftovers", 5.0),
        ]);
        let keys: Vec<&str> = dist.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Choice Scarf", "Assault Vest", "Sitrus Berry", "Leftovers"]);
        assert_eq!(dist.get("Leftovers"), Some(5.0));
        assert_eq!(dist.get("Life Orb"), None);
    }
}
