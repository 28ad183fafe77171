use proptest::prelude::*;
use redir_common::Ruleset;
use redir_core::RuleStore;
use std::collections::HashSet;
use workspace_tests::wildcard_rule;

/// Property tests for the rule store invariants
#[cfg(test)]
mod store_property_tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Create,
        Copy(u32),
        Delete(Vec<u32>),
        DeleteAll,
        Enable(Vec<u32>),
        Disable(Vec<u32>),
        ActivateAll,
        DeactivateAll,
        MoveUp(u32),
        MoveDown(u32),
        SaveRuleset(Vec<u32>),
        DeleteRuleset(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let id = 1u32..12;
        let ids = prop::collection::vec(1u32..12, 0..5);
        prop_oneof![
            4 => Just(Op::Create),
            1 => id.clone().prop_map(Op::Copy),
            2 => ids.clone().prop_map(Op::Delete),
            1 => Just(Op::DeleteAll),
            2 => ids.clone().prop_map(Op::Enable),
            2 => ids.clone().prop_map(Op::Disable),
            1 => Just(Op::ActivateAll),
            1 => Just(Op::DeactivateAll),
            1 => id.clone().prop_map(Op::MoveUp),
            1 => id.clone().prop_map(Op::MoveDown),
            2 => ids.prop_map(Op::SaveRuleset),
            1 => id.prop_map(Op::DeleteRuleset),
        ]
    }

    fn apply(store: &mut RuleStore, op: &Op) {
        let before = store.clone();
        let result = match op {
            Op::Create => store.save_rule(None, wildcard_rule("R", "a", "http://b")).map(|_| ()),
            Op::Copy(id) => store.copy_rule(*id).map(|_| ()),
            Op::Delete(ids) => {
                store.delete_rules(ids, false);
                Ok(())
            }
            Op::DeleteAll => {
                store.delete_rules(&[], true);
                Ok(())
            }
            Op::Enable(ids) => store.enable_rules(ids).map(|_| ()),
            Op::Disable(ids) => {
                store.disable_rules(ids);
                Ok(())
            }
            Op::ActivateAll => store.activate_all().map(|_| ()),
            Op::DeactivateAll => {
                store.deactivate_all();
                Ok(())
            }
            Op::MoveUp(id) => {
                store.move_rule_up(*id);
                Ok(())
            }
            Op::MoveDown(id) => {
                store.move_rule_down(*id);
                Ok(())
            }
            Op::SaveRuleset(ids) => store.save_ruleset(None, Ruleset::new("G", ids.clone())).map(|_| ()),
            Op::DeleteRuleset(id) => {
                store.delete_rulesets(&[*id]);
                Ok(())
            }
        };

        // A rejected operation leaves the store untouched
        if result.is_err() {
            assert_eq!(*store, before, "failed {:?} mutated the store", op);
        }
    }

    proptest! {
        #[test]
        fn test_store_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut store = RuleStore::new();

            for op in &ops {
                let before: HashSet<u32> = store.order().iter().copied().collect();
                apply(&mut store, op);

                let state = store.state();
                prop_assert!(store.check_invariants().is_ok(), "after {:?}: {:?}", op, store.check_invariants());

                // Order holds every surviving rule exactly once
                let order: HashSet<u32> = state.order.iter().copied().collect();
                prop_assert_eq!(order.len(), state.order.len());
                prop_assert_eq!(&order, &state.items.keys().copied().collect::<HashSet<_>>());

                // Rulesets never drop below two members
                for group in state.groups.values() {
                    prop_assert!(group.rules.len() >= 2);
                    prop_assert!(group.rules.iter().all(|id| order.contains(id)));
                }

                // Active set stays inside the order
                prop_assert!(state.active.iter().all(|id| order.contains(id)));

                // New ids never collide with live ones
                if matches!(op, Op::Create) {
                    let added: Vec<_> = order.difference(&before).collect();
                    prop_assert_eq!(added.len(), 1);
                    prop_assert_eq!(state.order.first(), added.first().copied());
                }
            }
        }

        #[test]
        fn test_enabling_active_rules_is_noop(count in 1usize..8, picks in prop::collection::vec(0usize..8, 1..6)) {
            let mut store = RuleStore::new();
            for _ in 0..count {
                store.save_rule(None, wildcard_rule("R", "a", "http://b")).unwrap();
            }
            let ids: Vec<u32> = picks.iter().map(|pick| (pick % count) as u32 + 1).collect();

            store.enable_rules(&ids).unwrap();
            let active = store.state().active.clone();

            let diff = store.enable_rules(&ids).unwrap();
            prop_assert!(diff.is_empty());
            prop_assert_eq!(&store.state().active, &active);
        }
    }
}
