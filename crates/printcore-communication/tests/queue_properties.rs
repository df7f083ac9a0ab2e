use printcore_communication::{CommandQueue, CommandSource};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Push(u16),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u16>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    #[test]
    fn queue_is_bounded_fifo(capacity in 1usize..8, ops in proptest::collection::vec(op(), 0..64)) {
        let mut queue = CommandQueue::new(capacity, 96);
        let mut model = std::collections::VecDeque::new();

        for op in ops {
            match op {
                Op::Push(n) => {
                    let text = format!("G1 X{n}");
                    let accepted = queue.try_enqueue(&text, true, CommandSource::Serial);
                    prop_assert_eq!(accepted, model.len() < capacity);
                    if accepted {
                        model.push_back(text);
                    }
                }
                Op::Pop => {
                    let got = queue.dequeue().map(|e| e.text);
                    prop_assert_eq!(got, model.pop_front());
                }
            }
            prop_assert!(queue.len() <= capacity);
            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.free(), capacity - model.len());
        }
    }
}
