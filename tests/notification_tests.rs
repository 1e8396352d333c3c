use statgraph::*;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared log the callbacks append to.
fn log<T>() -> Rc<RefCell<Vec<T>>> {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn test_batch_delivers_one_notification() {
    let mut calculator = Calculator::new();
    let life = Stat::new("Life");
    let seen = log();

    let sink = Rc::clone(&seen);
    let watched = life.clone();
    calculator
        .subscribe_total(&life, move |_event, ctx| {
            sink.borrow_mut().push(ctx.total(&watched).unwrap());
        })
        .unwrap();

    {
        let mut batch = calculator.batch();
        for _ in 0..8 {
            batch.add_modifier(&Modifier::base_add(&life, 5.0)).unwrap();
        }
        assert!(seen.borrow().is_empty());
    }

    assert_eq!(*seen.borrow(), vec![Some(NodeValue::from(40.0))]);
}

#[test]
fn test_every_batch_notifies_again() {
    let mut calculator = Calculator::new();
    let mana = Stat::new("Mana");
    let count = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&count);
    calculator
        .subscribe_total(&mana, move |_, _| *counter.borrow_mut() += 1)
        .unwrap();

    calculator.add_modifier(&Modifier::base_add(&mana, 10.0)).unwrap();
    calculator.add_modifier(&Modifier::increase(&mana, 10.0)).unwrap();
    assert_eq!(*count.borrow(), 2);
}

#[test]
fn test_unrelated_changes_do_not_notify() {
    let mut calculator = Calculator::new();
    let life = Stat::new("Life");
    let mana = Stat::new("Mana");
    let count = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&count);
    calculator
        .subscribe_total(&life, move |_, _| *counter.borrow_mut() += 1)
        .unwrap();

    calculator.add_modifier(&Modifier::base_add(&mana, 10.0)).unwrap();
    assert_eq!(*count.borrow(), 0);
}

#[test]
fn test_producers_are_notified_before_consumers() {
    let mut calculator = Calculator::new();
    let strength = Stat::new("Strength");
    let life = Stat::new("Life");
    let order = log();

    calculator
        .add_modifier(&Modifier::new(
            vec![life.clone()],
            Form::BaseAdd,
            PerStat::new(strength.clone(), 10.0, 5.0),
        ))
        .unwrap();

    // Subscribe the consumer first so registration order cannot explain the result.
    let sink = Rc::clone(&order);
    calculator
        .subscribe_total(&life, move |event, _| {
            sink.borrow_mut().push(event.stat().map(|s| s.identity().to_string()));
        })
        .unwrap();
    let sink = Rc::clone(&order);
    calculator
        .subscribe_total(&strength, move |event, _| {
            sink.borrow_mut().push(event.stat().map(|s| s.identity().to_string()));
        })
        .unwrap();

    calculator.add_modifier(&Modifier::base_add(&strength, 30.0)).unwrap();

    assert_eq!(
        *order.borrow(),
        vec![Some("Strength".to_string()), Some("Life".to_string())]
    );
    assert_eq!(calculator.total(&life).unwrap(), Some(NodeValue::from(15.0)));
}

#[test]
fn test_nested_batches_flush_once() {
    let mut calculator = Calculator::new();
    let life = Stat::new("Life");
    let count = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&count);
    calculator
        .subscribe_total(&life, move |_, _| *counter.borrow_mut() += 1)
        .unwrap();

    calculator.begin_batch();
    calculator.begin_batch();
    calculator.add_modifier(&Modifier::base_add(&life, 1.0)).unwrap();
    assert_eq!(calculator.batch_depth(), 2);
    calculator.end_batch().unwrap();
    assert_eq!(*count.borrow(), 0);
    calculator.add_modifier(&Modifier::base_add(&life, 2.0)).unwrap();
    calculator.end_batch().unwrap();

    assert_eq!(*count.borrow(), 1);
    assert_eq!(calculator.batch_depth(), 0);
    assert_eq!(calculator.end_batch(), Err(StatError::UnbalancedBatch));
}

#[test]
fn test_unsubscribed_callbacks_stay_silent() {
    let mut calculator = Calculator::new();
    let life = Stat::new("Life");
    let count = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&count);
    let id = calculator
        .subscribe_total(&life, move |_, _| *counter.borrow_mut() += 1)
        .unwrap();
    assert_eq!(
        calculator.subscriber_count(&life, NodeType::Total, &PathDefinition::main()),
        1
    );

    calculator.unsubscribe(id).unwrap();
    calculator.add_modifier(&Modifier::base_add(&life, 1.0)).unwrap();
    assert_eq!(*count.borrow(), 0);
    assert_eq!(
        calculator.subscriber_count(&life, NodeType::Total, &PathDefinition::main()),
        0
    );
}

#[test]
fn test_collection_changes_are_delivered() {
    let mut calculator = Calculator::new();
    let armour = Stat::new("Armour");
    let changes = log();

    let sink = Rc::clone(&changes);
    calculator
        .subscribe_collection(&armour, Form::BaseAdd, &PathDefinition::main(), move |change| {
            sink.borrow_mut().push(change.clone());
        })
        .unwrap();
    assert_eq!(
        calculator.collection_subscriber_count(&armour, Form::BaseAdd, &PathDefinition::main()),
        1
    );

    let plate = Modifier::base_add(&armour, 300.0);
    calculator.add_modifier(&plate).unwrap();
    // Other forms have their own collections.
    calculator.add_modifier(&Modifier::increase(&armour, 10.0)).unwrap();
    calculator.remove_modifier(&plate).unwrap();

    let changes = changes.borrow();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].added, vec![plate.id()]);
    assert!(changes[0].removed.is_empty());
    assert_eq!(changes[1].removed, vec![plate.id()]);
}

#[test]
fn test_cancelled_collection_changes_are_dropped() {
    let mut calculator = Calculator::new();
    let armour = Stat::new("Armour");
    let count = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&count);
    calculator
        .subscribe_collection(&armour, Form::BaseAdd, &PathDefinition::main(), move |_| {
            *counter.borrow_mut() += 1
        })
        .unwrap();

    let plate = Modifier::base_add(&armour, 300.0);
    {
        let mut batch = calculator.batch();
        batch.add_modifier(&plate).unwrap();
        batch.remove_modifier(&plate).unwrap();
    }
    assert_eq!(*count.borrow(), 0);
}

#[test]
fn test_collection_notifications_can_be_disabled() {
    let config = CalculatorConfig {
        notify_collection_changes: false,
        ..CalculatorConfig::default()
    };
    let mut calculator = Calculator::with_config(config);
    let armour = Stat::new("Armour");
    let count = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&count);
    calculator
        .subscribe_collection(&armour, Form::BaseAdd, &PathDefinition::main(), move |_| {
            *counter.borrow_mut() += 1
        })
        .unwrap();
    calculator.add_modifier(&Modifier::base_add(&armour, 300.0)).unwrap();

    assert_eq!(*count.borrow(), 0);
}

#[test]
fn test_subscriber_recovers_from_unresolved_reference() {
    let mut calculator = Calculator::new();
    let life = Stat::new("Life");
    let placeholder = Stat::new("Strength").with_entity(Entity::ModifierSource);
    let broken = Modifier::new(
        vec![life.clone()],
        Form::BaseAdd,
        StatReference::total(placeholder),
    );
    calculator.add_modifier(&broken).unwrap();

    let seen = log();
    let sink = Rc::clone(&seen);
    let watched = life.clone();
    calculator
        .subscribe_total(&life, move |_event, ctx| {
            sink.borrow_mut().push(ctx.total(&watched).unwrap());
        })
        .unwrap();
    assert!(calculator.total(&life).is_err());

    calculator.remove_modifier(&broken).unwrap();
    let before = seen.borrow().len();
    calculator.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();

    assert_eq!(seen.borrow().len(), before + 1);
    assert_eq!(seen.borrow().last(), Some(&Some(NodeValue::from(10.0))));
    assert_eq!(calculator.total(&life).unwrap(), Some(NodeValue::from(10.0)));
}

#[test]
fn test_subscriber_recovers_after_cycle_is_broken() {
    let mut calculator = Calculator::new();
    let life = Stat::new("Life");
    let mana = Stat::new("Mana");
    let back_reference = Modifier::new(
        vec![mana.clone()],
        Form::BaseAdd,
        StatReference::total(life.clone()),
    );
    calculator
        .add_modifiers(&[
            Modifier::new(
                vec![life.clone()],
                Form::BaseAdd,
                StatReference::total(mana.clone()),
            ),
            back_reference.clone(),
        ])
        .unwrap();

    let seen = log();
    let sink = Rc::clone(&seen);
    let watched = life.clone();
    calculator
        .subscribe_total(&life, move |_event, ctx| {
            sink.borrow_mut().push(ctx.total(&watched).unwrap());
        })
        .unwrap();
    assert!(matches!(
        calculator.total(&life),
        Err(StatError::Cycle { .. })
    ));

    // Breaking the cycle already changes Life.
    calculator.remove_modifier(&back_reference).unwrap();
    assert_eq!(*seen.borrow(), vec![None]);

    calculator.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();
    assert_eq!(*seen.borrow(), vec![None, Some(NodeValue::from(10.0))]);
    assert_eq!(calculator.total(&life).unwrap(), Some(NodeValue::from(10.0)));
}
