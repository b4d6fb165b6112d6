use tapesweep::{OpCode, Status, Tape, TapeBuilder, TapeError};

use OpCode::*;

fn ops(codes: &[OpCode]) -> Vec<u8> {
    codes.iter().map(|&op| op as u8).collect()
}

/// `y = exp(x)` as raw streams.
fn exp_streams() -> (Vec<u8>, Vec<u32>) {
    (
        ops(&[StartOfTape, AssignInd, Exp, AssignDep, EndOfTape]),
        vec![0, 0, 1, 1],
    )
}

#[test]
fn raw_streams_replay() {
    let (opcodes, locations) = exp_streams();
    let tape = Tape::<f64>::from_streams(opcodes, locations, vec![], 2).unwrap();
    assert_eq!(tape.num_independents(), 1);
    assert_eq!(tape.num_dependents(), 1);
    assert_eq!(tape.stats().num_operations, 5);

    let mut y = [0.0];
    let out = tape.sweep().zos_forward(1, 1, 0, &[0.0], Some(&mut y));
    assert_eq!(out.status, Status::Smooth);
    assert_eq!(y[0], 1.0);
}

#[test]
fn recorded_tapes_validate() {
    let mut b = TapeBuilder::new();
    let x = b.independent(0.5);
    let cs = b.take_stock(&[1.0, 2.0]);
    let s = b.sin(x);
    let m = b.min(s, cs[1]);
    let q = b.cond_assign(x, m, cs[0]);
    b.dependent(q);
    let tape: Tape<f64> = b.finish();
    assert_eq!(tape.validate(), Ok(()));

    let copy = Tape::from_streams(
        tape.opcodes().to_vec(),
        tape.locations().to_vec(),
        tape.values().to_vec(),
        tape.num_locations(),
    )
    .unwrap();
    assert_eq!(copy.stats(), tape.stats());
}

#[test]
fn unknown_opcode() {
    let (mut opcodes, locations) = exp_streams();
    opcodes[2] = 200;
    let err = Tape::<f64>::from_streams(opcodes, locations, vec![], 2).unwrap_err();
    assert_eq!(err, TapeError::UnknownOpcode { byte: 200, position: 2 });
}

#[test]
fn missing_markers() {
    let err = Tape::<f64>::from_streams(vec![], vec![], vec![], 0).unwrap_err();
    assert_eq!(err, TapeError::MissingStart);
    assert_eq!(err.to_string(), "tape must begin with StartOfTape");

    let (mut opcodes, locations) = exp_streams();
    opcodes.pop();
    let err = Tape::<f64>::from_streams(opcodes, locations, vec![], 2).unwrap_err();
    assert_eq!(err, TapeError::MissingEnd);
}

#[test]
fn truncated_streams() {
    let (opcodes, _) = exp_streams();
    let err = Tape::<f64>::from_streams(opcodes, vec![0, 0], vec![], 2).unwrap_err();
    assert_eq!(err, TapeError::TruncatedLocations { position: 2 });

    let opcodes = ops(&[StartOfTape, AssignInd, AddConst, AssignDep, EndOfTape]);
    let err = Tape::<f64>::from_streams(opcodes, vec![0, 0, 1, 1], vec![], 2).unwrap_err();
    assert_eq!(err, TapeError::TruncatedValues { position: 2 });
}

#[test]
fn trailing_operands() {
    let (opcodes, mut locations) = exp_streams();
    locations.push(1);
    let err = Tape::<f64>::from_streams(opcodes, locations, vec![], 2).unwrap_err();
    assert_eq!(err, TapeError::TrailingOperands { unread: 1 });

    let (mut opcodes, locations) = exp_streams();
    opcodes.push(Barrier as u8);
    let err = Tape::<f64>::from_streams(opcodes, locations, vec![0.0], 2).unwrap_err();
    assert_eq!(err, TapeError::TrailingOperands { unread: 2 });
}

#[test]
fn locations_must_fit_the_declared_count() {
    let (opcodes, locations) = exp_streams();
    let err = Tape::<f64>::from_streams(opcodes, locations, vec![], 1).unwrap_err();
    assert_eq!(
        err,
        TapeError::LocationOutOfRange {
            location: 1,
            position: 2,
            num_locations: 1,
        }
    );
}

#[test]
fn counted_ranges_are_checked() {
    let opcodes = ops(&[StartOfTape, TakeStock, EndOfTape]);
    let err = Tape::<f64>::from_streams(opcodes.clone(), vec![2, 0], vec![1.0, 2.0], 1).unwrap_err();
    assert!(matches!(err, TapeError::LocationOutOfRange { location: 0, position: 1, .. }));

    let err = Tape::<f64>::from_streams(opcodes.clone(), vec![2, 0], vec![1.0], 2).unwrap_err();
    assert_eq!(err, TapeError::TruncatedValues { position: 1 });

    assert!(Tape::<f64>::from_streams(opcodes, vec![2, 0], vec![1.0, 2.0], 2).is_ok());
}

#[test]
#[should_panic(expected = "recorded tape is malformed: location 5 at operation 2 exceeds declared 2 locations")]
fn raw_records_are_checked_on_finish() {
    let mut b = TapeBuilder::<f64>::new();
    let x = b.independent(1.0);
    let y = b.reserve(1)[0];
    b.emit(Exp, &[x.location(), 5], &[]);
    b.dependent(y);
    let _ = b.finish();
}
