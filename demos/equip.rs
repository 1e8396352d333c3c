//! Equip example: Swapping an item in one batch
//!
//! This example demonstrates:
//! - Adding several modifiers in one batch
//! - Subscribing to a stat's total
//! - Local (per-item) paths and conversions
//! - Inspecting a total with a breakdown

use statgraph::*;
use std::cell::Cell;
use std::rc::Rc;

fn main() -> Result<(), StatError> {
    let mut calculator = Calculator::new();

    let physical = Stat::new("PhysicalDamage");
    let fire = Stat::new("FireDamage");

    // Count how often the subscriber hears about physical damage
    let notifications = Rc::new(Cell::new(0));
    let counter = Rc::clone(&notifications);
    let watched = physical.clone();
    calculator.subscribe_total(&physical, move |_event, ctx| {
        counter.set(counter.get() + 1);
        if let Ok(Some(value)) = ctx.total(&watched) {
            println!("  [subscriber] PhysicalDamage is now {}", value);
        }
    })?;

    println!("Character base stats:");
    calculator.add_modifiers(&[
        Modifier::base_add(&physical, 12.0),
        Modifier::increase(&physical, 40.0),
    ])?;

    // Equip a sword: every modifier lands in one batch
    println!("\nEquipping Flaming Sword:");
    let sword = ModifierSource::local("FlamingSword");
    let sword_modifiers = vec![
        Modifier::base_add(&physical, 30.0).with_source(sword.clone()),
        Modifier::increase(&physical, 60.0).with_source(sword.clone()),
        Modifier::conversion(&physical, &fire, 25.0),
    ];
    {
        let mut batch = calculator.batch();
        for modifier in &sword_modifiers {
            println!("  - {}", modifier.description());
            batch.add_modifier(modifier)?;
        }
    }

    println!("\n=== Totals ===");
    println!("PhysicalDamage: {:?}", calculator.total(&physical)?);
    println!("FireDamage:     {:?}", calculator.total(&fire)?);
    println!("Notifications:  {}", notifications.get());

    println!("\n=== Breakdown ===");
    print!("{}", calculator.breakdown(&physical)?);

    // Unequip again
    calculator.remove_modifiers(&sword_modifiers)?;
    println!("\nAfter unequipping:");
    println!("PhysicalDamage: {:?}", calculator.total(&physical)?);
    println!("FireDamage:     {:?}", calculator.total(&fire)?);
    println!("Nodes in graph: {}", calculator.node_count());

    Ok(())
}
