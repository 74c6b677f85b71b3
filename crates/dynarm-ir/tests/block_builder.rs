use dynarm_ir::{IrEmitter, Terminator, Value};
use dynarm_types::A64LocationDescriptor;

fn loc(pc: u64) -> A64LocationDescriptor {
    A64LocationDescriptor::new(pc, 0, false)
}

#[test]
fn use_counts_track_producer_consumer_edges() {
    let mut em = IrEmitter::new(loc(0x1000));
    let a = em.add32(Value::ImmU32(1), Value::ImmU32(2));
    let _b = em.add32(a, Value::ImmU32(3));
    em.set_terminator(Terminator::ReturnToDispatch);
    let block = em.finish();

    let Value::Ref(a_id) = a else { panic!("expected ref") };
    assert_eq!(block.inst(a_id).use_count(), 1);
}

#[test]
#[should_panic(expected = "terminator already set")]
fn setting_terminator_twice_panics() {
    let mut em: IrEmitter<A64LocationDescriptor> = IrEmitter::new(loc(0));
    em.set_terminator(Terminator::ReturnToDispatch);
    em.set_terminator(Terminator::ReturnToDispatch);
}

#[test]
#[should_panic(expected = "cannot emit into a block whose terminator is already set")]
fn emitting_after_terminator_panics() {
    let mut em: IrEmitter<A64LocationDescriptor> = IrEmitter::new(loc(0));
    em.set_terminator(Terminator::ReturnToDispatch);
    em.add32(Value::ImmU32(1), Value::ImmU32(2));
}

#[test]
fn instruction_ids_are_assigned_in_emission_order() {
    let mut em = IrEmitter::new(loc(0x2000));
    let a = em.add32(Value::ImmU32(1), Value::ImmU32(1));
    let b = em.add32(a, Value::ImmU32(1));
    let c = em.add32(b, Value::ImmU32(1));
    em.set_terminator(Terminator::ReturnToDispatch);
    let block = em.finish();

    let ids: Vec<u32> = [a, b, c]
        .iter()
        .map(|v| v.as_ref().unwrap().0)
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(block.insts().len(), 3);
}

#[test]
fn flag_producer_gets_virtual_use_from_get_carry() {
    let mut em = IrEmitter::new(loc(0x3000));
    let sum = em.add_with_carry32(Value::ImmU32(1), Value::ImmU32(2), Value::ImmU1(false));
    let _carry = em.get_carry_from_op(sum);
    em.set_terminator(Terminator::ReturnToDispatch);
    let block = em.finish();

    let Value::Ref(sum_id) = sum else { panic!() };
    // The arithmetic result itself has no other consumer, but GetCarryFromOp
    // referencing it keeps its use count at 1, not 0 — it is not dead.
    assert_eq!(block.inst(sum_id).use_count(), 1);
    assert!(!block.inst(sum_id).is_dead());
}
