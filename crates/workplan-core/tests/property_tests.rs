//! Property tests: the dependency graph stays acyclic and no period staff
//! commits past capacity, whatever sequence of operations runs

use proptest::prelude::*;
use workplan_core::prelude::*;
use workplan_core::TaskDependency;
use workplan_test_utils::World;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_graph_stays_acyclic(
        task_count in 2..12usize,
        edges in proptest::collection::vec((0..12usize, 0..12usize), 0..40)
    ) {
        let world = World::new();
        let (_, ps) = world.assigned("Ada", 1000);
        let tasks: Vec<_> = (0..task_count).map(|_| world.task(&ps, 1).id).collect();

        for (from, to) in edges {
            if from >= tasks.len() || to >= tasks.len() {
                continue;
            }
            let before = world.planner.list::<TaskDependency>().len();
            let result = world.planner.add_dependency(NewDependency {
                predecessor: tasks[from],
                successor: tasks[to],
            });
            let after = world.planner.list::<TaskDependency>().len();

            match result {
                Ok(_) => prop_assert!(after == before || after == before + 1),
                Err(err) => {
                    prop_assert!(matches!(
                        err.kind(),
                        ErrorKind::CycleDetected | ErrorKind::ValidationFailed
                    ));
                    prop_assert_eq!(after, before);
                }
            }
            prop_assert!(world.planner.check_integrity().unwrap().cycle.is_none());
        }
    }

    #[test]
    fn prop_capacity_never_exceeded(
        capacity in 1..80u32,
        steps in proptest::collection::vec((any::<bool>(), 1..30u32), 1..40)
    ) {
        let world = World::new();
        let (_, ps) = world.assigned("Ada", capacity);
        let mut live: Vec<(workplan_core::TaskId, u32)> = Vec::new();

        for (delete, hours) in steps {
            if delete && !live.is_empty() {
                let (task, _) = live.remove(hours as usize % live.len());
                world.planner.delete_task(task).unwrap();
            } else {
                let before = world.reload(&ps).total_hours;
                match world.try_task(&ps, hours) {
                    Ok(task) => live.push((task.id, hours)),
                    Err(err) => {
                        prop_assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
                        prop_assert!(before + hours > capacity);
                        prop_assert_eq!(world.reload(&ps).total_hours, before);
                    }
                }
            }

            let row = world.reload(&ps);
            let sum: u32 = live.iter().map(|&(_, h)| h).sum();
            prop_assert_eq!(row.total_hours, sum);
            prop_assert_eq!(row.task_number as usize, live.len());
            prop_assert!(row.total_hours <= capacity);
        }
    }
}
