use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Normalized, RelationshipsExtracted, Enriched, Persisted, Failed],
    events {
        normalize { transition: { from: Ready, to: Normalized } }
        link { transition: { from: Normalized, to: RelationshipsExtracted } }
        enrich { transition: { from: RelationshipsExtracted, to: Enriched } }
        persist { transition: { from: Enriched, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Normalized, to: Failed }
            transition: { from: RelationshipsExtracted, to: Failed }
            transition: { from: Enriched, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
