//! The fixed entity type table.

/// Numeric entity type ids.
pub mod ids {
    pub const PLAYER: u32 = 0;

    pub const ZOMBIE: u32 = 1;
    pub const SKELETON: u32 = 2;
    pub const CREEPER: u32 = 3;
    pub const SPIDER: u32 = 4;
    pub const WITCH: u32 = 5;
    pub const ENDERMAN: u32 = 6;

    pub const PIG: u32 = 50;
    pub const COW: u32 = 51;
    pub const SHEEP: u32 = 52;
    pub const CHICKEN: u32 = 53;

    pub const ARROW: u32 = 100;
    pub const SNOWBALL: u32 = 101;
    pub const FIREBALL: u32 = 102;

    pub const ITEM: u32 = 150;
    pub const FALLING_BLOCK: u32 = 151;

    pub const BOAT: u32 = 200;
    pub const MINECART: u32 = 201;
}

/// Which variant a type id constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Player,
    Hostile,
    Passive,
    Projectile,
    Item,
    FallingBlock,
    Vehicle,
    Unknown,
}

pub fn classify(type_id: u32) -> Category {
    use ids::*;
    match type_id {
        PLAYER => Category::Player,
        ZOMBIE | SKELETON | CREEPER | SPIDER | WITCH | ENDERMAN => Category::Hostile,
        PIG | COW | SHEEP | CHICKEN => Category::Passive,
        ARROW | SNOWBALL | FIREBALL => Category::Projectile,
        ITEM => Category::Item,
        FALLING_BLOCK => Category::FallingBlock,
        BOAT | MINECART => Category::Vehicle,
        _ => Category::Unknown,
    }
}

pub fn type_name(type_id: u32) -> Option<&'static str> {
    use ids::*;
    let name = match type_id {
        PLAYER => "player",
        ZOMBIE => "zombie",
        SKELETON => "skeleton",
        CREEPER => "creeper",
        SPIDER => "spider",
        WITCH => "witch",
        ENDERMAN => "enderman",
        PIG => "pig",
        COW => "cow",
        SHEEP => "sheep",
        CHICKEN => "chicken",
        ARROW => "arrow",
        SNOWBALL => "snowball",
        FIREBALL => "fireball",
        ITEM => "item",
        FALLING_BLOCK => "falling_block",
        BOAT => "boat",
        MINECART => "minecart",
        _ => return None,
    };
    Some(name)
}

/// Starting and maximum health for mob types.
pub fn mob_max_health(type_id: u32) -> f32 {
    use ids::*;
    match type_id {
        SPIDER => 16.0,
        WITCH => 26.0,
        ENDERMAN => 40.0,
        PIG | COW => 10.0,
        SHEEP => 8.0,
        CHICKEN => 4.0,
        _ => 20.0,
    }
}

pub fn hostile_attack_damage(type_id: u32) -> f32 {
    use ids::*;
    match type_id {
        ZOMBIE => 3.0,
        SKELETON | SPIDER => 2.0,
        CREEPER => 0.0,
        ENDERMAN => 7.0,
        WITCH => 1.0,
        _ => 2.0,
    }
}

pub fn projectile_damage(type_id: u32) -> f32 {
    use ids::*;
    match type_id {
        ARROW => 2.0,
        FIREBALL => 6.0,
        _ => 0.0,
    }
}

/// `(width, height, max_passengers)`.
pub fn vehicle_profile(type_id: u32) -> (f64, f64, usize) {
    match type_id {
        ids::MINECART => (0.98, 0.7, 1),
        _ => (1.375, 0.5625, 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_id_is_classified() {
        for id in [0, 1, 2, 3, 4, 5, 6, 50, 51, 52, 53, 100, 101, 102, 150, 151, 200, 201] {
            assert!(type_name(id).is_some(), "{id} unnamed");
            assert_ne!(classify(id), Category::Unknown, "{id} unclassified");
        }
        assert_eq!(classify(9999), Category::Unknown);
        assert_eq!(type_name(9999), None);
    }

    #[test]
    fn categories() {
        assert_eq!(classify(ids::PLAYER), Category::Player);
        assert_eq!(classify(ids::CREEPER), Category::Hostile);
        assert_eq!(classify(ids::COW), Category::Passive);
        assert_eq!(classify(ids::FIREBALL), Category::Projectile);
        assert_eq!(classify(ids::FALLING_BLOCK), Category::FallingBlock);
        assert_eq!(classify(ids::MINECART), Category::Vehicle);
    }

    #[test]
    fn boats_are_wider_than_players() {
        let (width, _, seats) = vehicle_profile(ids::BOAT);
        assert!(width > 0.6);
        assert_eq!(seats, 2);
    }
}
