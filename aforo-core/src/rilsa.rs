//! Resolve `(origin, destination, class)` to a RILSA movement code.

use aforo_types::{Cardinal, MovementKind, ObjectClass, RilsaCode, RilsaRuleMap};

/// Pedestrians map to `P{i}` purely from the origin cardinal; vehicles go
/// through the per-dataset rule table. `None` means the movement is
/// unclassifiable (a mapping gap) and no event is produced.
pub fn map_movement(
    origin: Cardinal,
    dest: Cardinal,
    class: &ObjectClass,
    rules: &RilsaRuleMap,
) -> Option<RilsaCode> {
    if class.is_pedestrian() {
        Some(RilsaCode::from_origin(MovementKind::Pedestrian, origin))
    } else {
        rules.lookup(origin, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicles_use_the_rule_table() {
        let rules = RilsaRuleMap::default();
        let car = ObjectClass::new("car");
        let code = map_movement(Cardinal::N, Cardinal::S, &car, &rules).unwrap();
        assert_eq!(code.to_string(), "1");
        let code = map_movement(Cardinal::E, Cardinal::S, &car, &rules).unwrap();
        assert_eq!(code.to_string(), "8");
    }

    #[test]
    fn pedestrian_code_ignores_destination_and_rules() {
        let empty = RilsaRuleMap { rules: vec![] };
        let person = ObjectClass::new("person");
        for dest in Cardinal::ALL {
            let code = map_movement(Cardinal::O, dest, &person, &empty).unwrap();
            assert_eq!(code.to_string(), "P3");
        }
    }

    #[test]
    fn mapping_gap_yields_none() {
        let empty = RilsaRuleMap { rules: vec![] };
        let car = ObjectClass::new("car");
        assert!(map_movement(Cardinal::N, Cardinal::S, &car, &empty).is_none());
    }
}
