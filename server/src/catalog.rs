//! Read-only species catalog loaded once at startup.

use log::info;
use rand::Rng;
use shared::{Species, STARTER_NAMES};
use std::path::Path;

/// Immutable list of creature templates. Spawning always clones a template
/// into a fresh instance; the catalog itself is never mutated.
pub struct SpeciesCatalog {
    species: Vec<Species>,
}

impl SpeciesCatalog {
    /// Loads the catalog from a JSON array on disk. Fails if the file is
    /// missing, malformed, empty, or lacks any of the starter species.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let file = std::fs::File::open(path)
            .map_err(|e| format!("cannot open species catalog {}: {}", path.display(), e))?;
        let species: Vec<Species> = serde_json::from_reader(std::io::BufReader::new(file))?;
        let catalog = Self::from_species(species)?;
        info!(
            "Loaded {} species from {}",
            catalog.species.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Builds a catalog from an in-memory species list, validating the
    /// same constraints as [`SpeciesCatalog::load`].
    pub fn from_species(species: Vec<Species>) -> Result<Self, Box<dyn std::error::Error>> {
        if species.is_empty() {
            return Err("species catalog is empty".into());
        }
        let catalog = Self { species };
        for starter in STARTER_NAMES {
            if catalog.find(starter).is_none() {
                return Err(format!("species catalog is missing starter {}", starter).into());
            }
        }
        Ok(catalog)
    }

    /// Case-insensitive lookup by species name.
    pub fn find(&self, name: &str) -> Option<&Species> {
        self.species
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Uniformly-random template, used by the spawn wave.
    pub fn random(&self, rng: &mut impl Rng) -> &Species {
        &self.species[rng.gen_range(0..self.species.len())]
    }

    /// The three starter templates granted to new battle players.
    pub fn starters(&self) -> Vec<&Species> {
        STARTER_NAMES
            .iter()
            .map(|name| self.find(name).expect("validated at load"))
            .collect()
    }

    pub fn all(&self) -> &[Species] {
        &self.species
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn species(name: &str, primary_type: &str) -> Species {
        Species {
            index: format!("#{}", name.len()),
            name: name.to_string(),
            exp: 60,
            hp: 40,
            attack: 50,
            defense: 45,
            sp_attack: 55,
            sp_defense: 50,
            speed: 60,
            types: vec![primary_type.to_string()],
            description: String::new(),
        }
    }

    fn full_catalog() -> SpeciesCatalog {
        SpeciesCatalog::from_species(vec![
            species("Charmander", "fire"),
            species("Bulbasaur", "grass"),
            species("Squirtle", "water"),
            species("Pikachu", "electric"),
        ])
        .unwrap()
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let catalog = full_catalog();
        assert!(catalog.find("charmander").is_some());
        assert!(catalog.find("PIKACHU").is_some());
        assert!(catalog.find("Mewtwo").is_none());
    }

    #[test]
    fn test_starters_resolve() {
        let catalog = full_catalog();
        let starters = catalog.starters();
        assert_eq!(starters.len(), 3);
        assert_eq!(starters[0].name, "Charmander");
        assert_eq!(starters[1].name, "Bulbasaur");
        assert_eq!(starters[2].name, "Squirtle");
    }

    #[test]
    fn test_missing_starter_rejected() {
        let result = SpeciesCatalog::from_species(vec![species("Pikachu", "electric")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(SpeciesCatalog::from_species(Vec::new()).is_err());
    }

    #[test]
    fn test_random_pick_is_from_catalog() {
        let catalog = full_catalog();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let pick = catalog.random(&mut rng);
            assert!(catalog.find(&pick.name).is_some());
        }
    }
}
