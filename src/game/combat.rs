//! Combat Actions
//!
//! The three moves a turn holder may make and how each one resolves.

use crate::core::rng::RollSource;

/// Damage dealt by the fixed strike.
pub const FIXED_STRIKE_DAMAGE: i32 = 5;

/// Inclusive damage range of the random strike.
pub const RANDOM_STRIKE_RANGE: (i32, i32) = (2, 8);

/// Inclusive recovery range of the heal.
pub const HEAL_RANGE: (i32, i32) = (2, 4);

/// A move chosen by the turn holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum CombatAction {
    /// Opponent takes exactly [`FIXED_STRIKE_DAMAGE`].
    FixedStrike = 1,
    /// Opponent takes a uniform roll in [`RANDOM_STRIKE_RANGE`].
    RandomStrike = 2,
    /// Actor recovers a uniform roll in [`HEAL_RANGE`].
    Heal = 3,
}

impl TryFrom<i32> for CombatAction {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(CombatAction::FixedStrike),
            2 => Ok(CombatAction::RandomStrike),
            3 => Ok(CombatAction::Heal),
            other => Err(other),
        }
    }
}

/// Outcome of resolving an action, before it is applied to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionEffect {
    /// Subtract `amount` hp from the opponent.
    Damage {
        /// Amount rolled.
        amount: i32,
    },
    /// Add `amount` hp to the actor.
    Heal {
        /// Amount rolled.
        amount: i32,
    },
}

impl ActionEffect {
    /// Human-readable description broadcast to both players.
    pub fn describe(&self, action: CombatAction) -> String {
        match (action, self) {
            (CombatAction::FixedStrike, ActionEffect::Damage { amount }) => {
                format!("Нанёс фиксированный урон {}", amount)
            }
            (_, ActionEffect::Damage { amount }) => format!("Нанёс случайный урон {}", amount),
            (_, ActionEffect::Heal { amount }) => format!("Восстановил {} HP", amount),
        }
    }
}

/// Roll the effect of `action`.
pub fn resolve(action: CombatAction, rolls: &dyn RollSource) -> ActionEffect {
    match action {
        CombatAction::FixedStrike => ActionEffect::Damage {
            amount: FIXED_STRIKE_DAMAGE,
        },
        CombatAction::RandomStrike => ActionEffect::Damage {
            amount: rolls.roll(RANDOM_STRIKE_RANGE.0, RANDOM_STRIKE_RANGE.1),
        },
        CombatAction::Heal => ActionEffect::Heal {
            amount: rolls.roll(HEAL_RANGE.0, HEAL_RANGE.1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::SharedRng;

    /// Always rolls the top of the requested range.
    struct MaxRoll;

    impl RollSource for MaxRoll {
        fn roll(&self, _min: i32, max: i32) -> i32 {
            max
        }
    }

    #[test]
    fn test_action_codes() {
        assert_eq!(CombatAction::try_from(1), Ok(CombatAction::FixedStrike));
        assert_eq!(CombatAction::try_from(2), Ok(CombatAction::RandomStrike));
        assert_eq!(CombatAction::try_from(3), Ok(CombatAction::Heal));
        assert_eq!(CombatAction::try_from(0), Err(0));
        assert_eq!(CombatAction::try_from(4), Err(4));
        assert_eq!(CombatAction::try_from(-1), Err(-1));
    }

    #[test]
    fn test_fixed_strike_ignores_rolls() {
        let effect = resolve(CombatAction::FixedStrike, &MaxRoll);
        assert_eq!(effect, ActionEffect::Damage { amount: 5 });
        assert!(effect.describe(CombatAction::FixedStrike).contains("фиксированный"));
    }

    #[test]
    fn test_roll_ranges() {
        let rng = SharedRng::new(99);
        for _ in 0..500 {
            match resolve(CombatAction::RandomStrike, &rng) {
                ActionEffect::Damage { amount } => assert!((2..=8).contains(&amount)),
                other => panic!("unexpected effect {:?}", other),
            }
            match resolve(CombatAction::Heal, &rng) {
                ActionEffect::Heal { amount } => assert!((2..=4).contains(&amount)),
                other => panic!("unexpected effect {:?}", other),
            }
        }
    }

    #[test]
    fn test_descriptions() {
        let strike = resolve(CombatAction::RandomStrike, &MaxRoll);
        assert_eq!(strike.describe(CombatAction::RandomStrike), "Нанёс случайный урон 8");

        let heal = resolve(CombatAction::Heal, &MaxRoll);
        assert_eq!(heal.describe(CombatAction::Heal), "Восстановил 4 HP");
    }
}
