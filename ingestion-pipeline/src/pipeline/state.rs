use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Identified, Validated, Extracted, Normalized, Stored, Failed],
    events {
        identify { transition: { from: Ready, to: Identified } }
        validate { transition: { from: Identified, to: Validated } }
        extract { transition: { from: Validated, to: Extracted } }
        normalize { transition: { from: Extracted, to: Normalized } }
        store { transition: { from: Normalized, to: Stored } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Identified, to: Failed }
            transition: { from: Validated, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Normalized, to: Failed }
            transition: { from: Stored, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
