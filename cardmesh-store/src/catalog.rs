// Pack templates are reference data: a deterministic production rule
// mapping a template id to the fixed set of cards opening it yields.
// Not mutated by the core; a deployment loads its own template table
// at startup (or takes the default below for tests and demos).

use std::collections::HashMap;

use crate::types::{CardId, PackTemplate};

pub struct Catalog {
    templates: HashMap<String, PackTemplate>,
}

impl Catalog {
    pub fn new(templates: Vec<PackTemplate>) -> Self {
        Catalog {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn resolve(&self, template_id: &str) -> Option<&PackTemplate> {
        self.templates.get(template_id)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new(vec![PackTemplate {
            id: "starter".to_string(),
            cards: vec![
                CardId::from("starter-rock-common"),
                CardId::from("starter-paper-common"),
                CardId::from("starter-scissors-common"),
                CardId::from("starter-rock-uncommon"),
                CardId::from("starter-paper-rare"),
            ],
        }])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_catalog_resolves_starter() {
        let catalog = Catalog::default();
        let template = catalog.resolve("starter").unwrap();
        assert_eq!(template.cards.len(), 5);
    }

    #[test]
    fn unknown_template_is_none() {
        let catalog = Catalog::default();
        assert!(catalog.resolve("nonexistent").is_none());
    }
}
