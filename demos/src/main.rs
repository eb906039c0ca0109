//! A shelf of bank accounts, worked the way the storage engine's own
//! example binary exercises its `Engine` trait: allocate some state,
//! mutate it inside transactions, and show what a conflicting concurrent
//! writer looks like.

use std::sync::Arc;
use std::thread;

use stm::{
    allocate, initialize, readable, transaction, transactionally, writable, Cursor, Memory,
    PersistentMemory, Value,
};

fn main() {
    env_logger_init();

    println!("Hello, stm!");

    run().unwrap();
    run_persistent().unwrap();

    println!("Bye~");
}

fn env_logger_init() {
    let _ = log::set_max_level(log::LevelFilter::Info);
}

fn run() -> stm::CResult<()> {
    let memory: Arc<Memory<Value>> = Arc::new(Memory::new("bank", true, true));
    initialize(Some(memory.clone()))?;

    let alice = Cursor::new();
    let bob = Cursor::new();
    transaction("open-accounts", true, || {
        allocate(&alice, Value::Int(100))?;
        allocate(&bob, Value::Int(0))?;
        Ok(())
    })?;

    transactionally("transfer", 10, || {
        let from = readable(&alice)?;
        let Value::Int(balance) = from else { unreachable!() };
        let cell = writable(&alice)?;
        *cell.borrow_mut() = Value::Int(balance - 10);
        drop(cell);

        let to = readable(&bob)?;
        let Value::Int(balance) = to else { unreachable!() };
        let cell = writable(&bob)?;
        *cell.borrow_mut() = Value::Int(balance + 10);
        Ok(())
    })?;

    let (a, b) = transaction("check", true, || Ok((readable(&alice)?, readable(&bob)?)))?
        .expect("autocommit transaction always returns Some on Ok");
    println!("alice={a:?} bob={b:?}");
    assert_eq!(a, Value::Int(90));
    assert_eq!(b, Value::Int(10));

    // A concurrent writer racing the transfer above retries until its
    // optimistic read of `alice` is no longer stale.
    let racer_memory = memory.clone();
    let racer_alice = alice.clone();
    let racer = thread::spawn(move || -> stm::CResult<()> {
        initialize(Some(racer_memory))?;
        transactionally("racer-bonus", 10, || {
            let cell = writable(&racer_alice)?;
            let Value::Int(balance) = *cell.borrow() else { unreachable!() };
            *cell.borrow_mut() = Value::Int(balance + 1);
            Ok(())
        })?;
        Ok(())
    });
    racer.join().expect("racer thread panicked")?;

    let final_alice = transaction("final-check", true, || readable(&alice))?
        .expect("autocommit transaction always returns Some on Ok");
    println!("alice after racer={final_alice:?}");
    assert_eq!(final_alice, Value::Int(91));

    Ok(())
}

fn run_persistent() -> stm::CResult<()> {
    let dir = tempdir::TempDir::new("stm-demo")?;
    let path = dir.path().join("accounts.log");

    let ledger_id = {
        let memory: Arc<PersistentMemory<Value>> =
            Arc::new(PersistentMemory::open("ledger", &path, true, true)?);
        let ledger = memory.new_id();
        initialize(Some(memory.clone()))?;
        transaction("open-treasury", true, || allocate(&ledger, Value::Int(1_000)))?;
        ledger.persistent_id().expect("persistent cursor carries its id").to_owned()
    };

    // Reopen from the same path: the treasury balance survived the restart.
    let reopened: Arc<PersistentMemory<Value>> =
        Arc::new(PersistentMemory::open("ledger", &path, true, true)?);
    let ledger = reopened.fetch(&ledger_id)?;
    initialize(Some(reopened))?;
    let balance = transaction("read-treasury", true, || readable(&ledger))?
        .expect("autocommit transaction always returns Some on Ok");
    println!("treasury after reopen={balance:?}");
    assert_eq!(balance, Value::Int(1_000));

    Ok(())
}
