//! Route resolution: exact paths first, then longest prefix, with an
//! unconditional free table consulted before either.

use std::collections::HashMap;

/// A paid route. `P` is the rail's price unit: integer minor units
/// (sats) on the Lightning rail, a decimal on the stablecoin rail.
#[derive(Debug, Clone)]
pub struct RouteEntry<P> {
    pub backend: String,
    pub price: P,
}

pub enum RouteMatch<'a, P> {
    Free(&'a str),
    Paid(&'a RouteEntry<P>),
    NotFound,
}

pub struct RouteTable<P> {
    exact: HashMap<String, RouteEntry<P>>,
    /// Sorted longest-first at build time so the first hit wins.
    prefix: Vec<(String, RouteEntry<P>)>,
    free: HashMap<String, String>,
}

impl<P> RouteTable<P> {
    pub fn new(
        exact: HashMap<String, RouteEntry<P>>,
        mut prefix: Vec<(String, RouteEntry<P>)>,
        free: HashMap<String, String>,
    ) -> Self {
        prefix.sort_by_key(|(p, _)| std::cmp::Reverse(p.len()));
        Self {
            exact,
            prefix,
            free,
        }
    }

    pub fn resolve(&self, path: &str) -> RouteMatch<'_, P> {
        if let Some(backend) = self.free.get(path) {
            return RouteMatch::Free(backend);
        }
        if let Some(entry) = self.exact.get(path) {
            return RouteMatch::Paid(entry);
        }
        for (prefix, entry) in &self.prefix {
            if path.starts_with(prefix.as_str()) {
                return RouteMatch::Paid(entry);
            }
        }
        RouteMatch::NotFound
    }

    pub fn paid_paths(&self) -> impl Iterator<Item = (&str, &RouteEntry<P>)> {
        self.exact.iter().map(|(p, e)| (p.as_str(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable<u64> {
        let mut exact = HashMap::new();
        exact.insert(
            "/oracle/btcusd".to_string(),
            RouteEntry {
                backend: "http://127.0.0.1:9100".to_string(),
                price: 10,
            },
        );
        let prefix = vec![
            (
                "/dlc/oracle/attestations/".to_string(),
                RouteEntry {
                    backend: "http://127.0.0.1:9104".to_string(),
                    price: 1000,
                },
            ),
            (
                "/dlc/".to_string(),
                RouteEntry {
                    backend: "http://127.0.0.1:9104".to_string(),
                    price: 1,
                },
            ),
        ];
        let mut free = HashMap::new();
        free.insert("/health".to_string(), "http://127.0.0.1:9100".to_string());
        RouteTable::new(exact, prefix, free)
    }

    #[test]
    fn test_free_wins_over_paid() {
        assert!(matches!(table().resolve("/health"), RouteMatch::Free(_)));
    }

    #[test]
    fn test_exact_match() {
        match table().resolve("/oracle/btcusd") {
            RouteMatch::Paid(entry) => assert_eq!(entry.price, 10),
            _ => panic!("expected paid route"),
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        match table().resolve("/dlc/oracle/attestations/BTCUSD-2026-08-02T15:00:00Z") {
            RouteMatch::Paid(entry) => assert_eq!(entry.price, 1000),
            _ => panic!("expected paid prefix route"),
        }
    }

    #[test]
    fn test_miss_is_not_found() {
        assert!(matches!(
            table().resolve("/oracle/dogeusd"),
            RouteMatch::NotFound
        ));
    }
}
