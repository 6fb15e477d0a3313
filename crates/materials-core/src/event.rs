//! Materials domain events and the synchronous, in-process event bus.
//!
//! Commands on [`MaterialsDataManager`] publish their events once every
//! mutation has been applied, and every matching subscriber has run before
//! the command returns. Handlers receive the store mutably and may issue
//! further commands; those nested commands deliver their own events before
//! they return, so delivery is depth-first.
//!
//! A handler is never re-entered. Events it would receive while it is
//! already running are held and handed to it, in order, as soon as its
//! current invocation returns.
//!
//! # Filters
//!
//! Each subscription carries an [`EventFilter`]: an [`EventKind`] plus an
//! optional predicate. Constructors cover the usual granularities: every
//! event of a kind, by producer, by producer and property or resource, by
//! batch, by stage, and by source or destination producer for stage
//! ownership transfers.

use crate::id::*;
use crate::manager::MaterialsDataManager;
use crate::property::PropertyValue;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A materials domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialsEvent {
    MaterialAdded {
        material: MaterialId,
    },
    ProducerAdded {
        producer: MaterialsProducerId,
    },
    ProducerPropertyDefined {
        property: ProducerPropertyId,
    },
    ProducerPropertyUpdated {
        producer: MaterialsProducerId,
        property: ProducerPropertyId,
        previous: PropertyValue,
        current: PropertyValue,
    },
    ProducerResourceUpdated {
        producer: MaterialsProducerId,
        resource: ResourceId,
        previous: i64,
        current: i64,
    },
    BatchPropertyDefined {
        material: MaterialId,
        property: BatchPropertyId,
    },
    BatchAdded {
        batch: BatchId,
        producer: MaterialsProducerId,
        material: MaterialId,
    },
    BatchImminentRemoval {
        batch: BatchId,
        producer: MaterialsProducerId,
    },
    BatchAmountUpdated {
        batch: BatchId,
        producer: MaterialsProducerId,
        previous: f64,
        current: f64,
    },
    BatchPropertyUpdated {
        batch: BatchId,
        producer: MaterialsProducerId,
        property: BatchPropertyId,
        previous: PropertyValue,
        current: PropertyValue,
    },
    StageAdded {
        stage: StageId,
        producer: MaterialsProducerId,
    },
    StageImminentRemoval {
        stage: StageId,
        producer: MaterialsProducerId,
    },
    StageMembershipAdded {
        batch: BatchId,
        stage: StageId,
        producer: MaterialsProducerId,
    },
    StageMembershipRemoved {
        batch: BatchId,
        stage: StageId,
        producer: MaterialsProducerId,
    },
    StageOfferUpdated {
        stage: StageId,
        producer: MaterialsProducerId,
        previous: bool,
        current: bool,
    },
    StageProducerUpdated {
        stage: StageId,
        previous: MaterialsProducerId,
        current: MaterialsProducerId,
    },
}

/// Discriminant tag for event types, used for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MaterialAdded,
    ProducerAdded,
    ProducerPropertyDefined,
    ProducerPropertyUpdated,
    ProducerResourceUpdated,
    BatchPropertyDefined,
    BatchAdded,
    BatchImminentRemoval,
    BatchAmountUpdated,
    BatchPropertyUpdated,
    StageAdded,
    StageImminentRemoval,
    StageMembershipAdded,
    StageMembershipRemoved,
    StageOfferUpdated,
    StageProducerUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 16] = [
        EventKind::MaterialAdded,
        EventKind::ProducerAdded,
        EventKind::ProducerPropertyDefined,
        EventKind::ProducerPropertyUpdated,
        EventKind::ProducerResourceUpdated,
        EventKind::BatchPropertyDefined,
        EventKind::BatchAdded,
        EventKind::BatchImminentRemoval,
        EventKind::BatchAmountUpdated,
        EventKind::BatchPropertyUpdated,
        EventKind::StageAdded,
        EventKind::StageImminentRemoval,
        EventKind::StageMembershipAdded,
        EventKind::StageMembershipRemoved,
        EventKind::StageOfferUpdated,
        EventKind::StageProducerUpdated,
    ];
}

impl MaterialsEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MaterialsEvent::MaterialAdded { .. } => EventKind::MaterialAdded,
            MaterialsEvent::ProducerAdded { .. } => EventKind::ProducerAdded,
            MaterialsEvent::ProducerPropertyDefined { .. } => EventKind::ProducerPropertyDefined,
            MaterialsEvent::ProducerPropertyUpdated { .. } => EventKind::ProducerPropertyUpdated,
            MaterialsEvent::ProducerResourceUpdated { .. } => EventKind::ProducerResourceUpdated,
            MaterialsEvent::BatchPropertyDefined { .. } => EventKind::BatchPropertyDefined,
            MaterialsEvent::BatchAdded { .. } => EventKind::BatchAdded,
            MaterialsEvent::BatchImminentRemoval { .. } => EventKind::BatchImminentRemoval,
            MaterialsEvent::BatchAmountUpdated { .. } => EventKind::BatchAmountUpdated,
            MaterialsEvent::BatchPropertyUpdated { .. } => EventKind::BatchPropertyUpdated,
            MaterialsEvent::StageAdded { .. } => EventKind::StageAdded,
            MaterialsEvent::StageImminentRemoval { .. } => EventKind::StageImminentRemoval,
            MaterialsEvent::StageMembershipAdded { .. } => EventKind::StageMembershipAdded,
            MaterialsEvent::StageMembershipRemoved { .. } => EventKind::StageMembershipRemoved,
            MaterialsEvent::StageOfferUpdated { .. } => EventKind::StageOfferUpdated,
            MaterialsEvent::StageProducerUpdated { .. } => EventKind::StageProducerUpdated,
        }
    }

    /// The producer an event is scoped to, if any. Ownership transfers
    /// report the destination producer.
    pub fn producer(&self) -> Option<&MaterialsProducerId> {
        match self {
            MaterialsEvent::ProducerAdded { producer }
            | MaterialsEvent::ProducerPropertyUpdated { producer, .. }
            | MaterialsEvent::ProducerResourceUpdated { producer, .. }
            | MaterialsEvent::BatchAdded { producer, .. }
            | MaterialsEvent::BatchImminentRemoval { producer, .. }
            | MaterialsEvent::BatchAmountUpdated { producer, .. }
            | MaterialsEvent::BatchPropertyUpdated { producer, .. }
            | MaterialsEvent::StageAdded { producer, .. }
            | MaterialsEvent::StageImminentRemoval { producer, .. }
            | MaterialsEvent::StageMembershipAdded { producer, .. }
            | MaterialsEvent::StageMembershipRemoved { producer, .. }
            | MaterialsEvent::StageOfferUpdated { producer, .. } => Some(producer),
            MaterialsEvent::StageProducerUpdated { current, .. } => Some(current),
            MaterialsEvent::MaterialAdded { .. }
            | MaterialsEvent::ProducerPropertyDefined { .. }
            | MaterialsEvent::BatchPropertyDefined { .. } => None,
        }
    }

    pub fn batch(&self) -> Option<BatchId> {
        match self {
            MaterialsEvent::BatchAdded { batch, .. }
            | MaterialsEvent::BatchImminentRemoval { batch, .. }
            | MaterialsEvent::BatchAmountUpdated { batch, .. }
            | MaterialsEvent::BatchPropertyUpdated { batch, .. }
            | MaterialsEvent::StageMembershipAdded { batch, .. }
            | MaterialsEvent::StageMembershipRemoved { batch, .. } => Some(*batch),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<StageId> {
        match self {
            MaterialsEvent::StageAdded { stage, .. }
            | MaterialsEvent::StageImminentRemoval { stage, .. }
            | MaterialsEvent::StageMembershipAdded { stage, .. }
            | MaterialsEvent::StageMembershipRemoved { stage, .. }
            | MaterialsEvent::StageOfferUpdated { stage, .. }
            | MaterialsEvent::StageProducerUpdated { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

type Predicate = Box<dyn Fn(&MaterialsEvent) -> bool>;

/// Selects the events a subscription receives.
pub struct EventFilter {
    kind: EventKind,
    predicate: Option<Predicate>,
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter")
            .field("kind", &self.kind)
            .field(
                "predicate",
                &if self.predicate.is_some() {
                    "Some(<fn>)"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

impl EventFilter {
    /// Every event of the given kind.
    pub fn of_kind(kind: EventKind) -> Self {
        Self {
            kind,
            predicate: None,
        }
    }

    /// Events of a kind that pass an arbitrary predicate.
    pub fn matching(
        kind: EventKind,
        predicate: impl Fn(&MaterialsEvent) -> bool + 'static,
    ) -> Self {
        Self {
            kind,
            predicate: Some(Box::new(predicate)),
        }
    }

    /// Events of a kind scoped to one producer.
    pub fn for_producer(kind: EventKind, producer: MaterialsProducerId) -> Self {
        Self::matching(kind, move |event| event.producer() == Some(&producer))
    }

    /// Events of a kind about one batch.
    pub fn for_batch(kind: EventKind, batch: BatchId) -> Self {
        Self::matching(kind, move |event| event.batch() == Some(batch))
    }

    /// Events of a kind about one stage.
    pub fn for_stage(kind: EventKind, stage: StageId) -> Self {
        Self::matching(kind, move |event| event.stage() == Some(stage))
    }

    /// Producer property updates for one producer and property.
    pub fn producer_property_updated(
        producer: MaterialsProducerId,
        property: ProducerPropertyId,
    ) -> Self {
        Self::matching(EventKind::ProducerPropertyUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::ProducerPropertyUpdated { producer: p, property: q, .. }
                    if *p == producer && *q == property
            )
        })
    }

    /// Producer property updates for one property across all producers.
    pub fn producer_property_updated_for_property(property: ProducerPropertyId) -> Self {
        Self::matching(EventKind::ProducerPropertyUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::ProducerPropertyUpdated { property: q, .. } if *q == property
            )
        })
    }

    /// Ledger updates for one producer and resource.
    pub fn producer_resource_updated(producer: MaterialsProducerId, resource: ResourceId) -> Self {
        Self::matching(EventKind::ProducerResourceUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::ProducerResourceUpdated { producer: p, resource: r, .. }
                    if *p == producer && *r == resource
            )
        })
    }

    /// Ledger updates for one resource across all producers.
    pub fn producer_resource_updated_for_resource(resource: ResourceId) -> Self {
        Self::matching(EventKind::ProducerResourceUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::ProducerResourceUpdated { resource: r, .. } if *r == resource
            )
        })
    }

    /// Batch property updates for one producer and property.
    pub fn batch_property_updated(
        producer: MaterialsProducerId,
        property: BatchPropertyId,
    ) -> Self {
        Self::matching(EventKind::BatchPropertyUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::BatchPropertyUpdated { producer: p, property: q, .. }
                    if *p == producer && *q == property
            )
        })
    }

    /// Batches added for one material.
    pub fn batch_added_for_material(material: MaterialId) -> Self {
        Self::matching(EventKind::BatchAdded, move |event| {
            matches!(event, MaterialsEvent::BatchAdded { material: m, .. } if *m == material)
        })
    }

    /// Stage ownership transfers away from a producer.
    pub fn stage_producer_updated_from(producer: MaterialsProducerId) -> Self {
        Self::matching(EventKind::StageProducerUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::StageProducerUpdated { previous, .. } if *previous == producer
            )
        })
    }

    /// Stage ownership transfers to a producer.
    pub fn stage_producer_updated_to(producer: MaterialsProducerId) -> Self {
        Self::matching(EventKind::StageProducerUpdated, move |event| {
            matches!(
                event,
                MaterialsEvent::StageProducerUpdated { current, .. } if *current == producer
            )
        })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether the filter selects `event`.
    pub fn accepts(&self, event: &MaterialsEvent) -> bool {
        if event.kind() != self.kind {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(event),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// A subscriber callback. Receives the store and may issue further commands.
pub type EventHandler = Box<dyn FnMut(&mut MaterialsDataManager, &MaterialsEvent)>;

/// Handle returned by [`MaterialsDataManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) filter: EventFilter,
    /// Checked out (`None`) while the handler is running.
    pub(crate) handler: Option<EventHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("running", &self.handler.is_none())
            .finish_non_exhaustive()
    }
}

/// Subscriber list plus events held for handlers that are still running.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    pub(crate) subscriptions: Vec<Subscription>,
    pub(crate) held: Vec<(SubscriptionId, MaterialsEvent)>,
    next_subscription: u64,
    total_published: u64,
}

impl EventBus {
    pub(crate) fn subscribe(
        &mut self,
        filter: EventFilter,
        handler: EventHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            filter,
            handler: Some(handler),
        });
        id
    }

    /// Takes effect immediately, including for events already in flight.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.retain(|s| s.id != id);
        self.held.retain(|(held, _)| *held != id);
    }

    pub(crate) fn total_published(&self) -> u64 {
        self.total_published
    }

    fn find_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions.iter_mut().find(|s| s.id == id)
    }

    fn take_held(&mut self, id: SubscriptionId) -> Option<MaterialsEvent> {
        let index = self.held.iter().position(|(held, _)| *held == id)?;
        Some(self.held.remove(index).1)
    }
}

/// Deliver `events` in order. Each event reaches every matching subscriber,
/// in subscription order, before the next event is considered; commands
/// issued by a handler deliver their own events before returning.
pub(crate) fn deliver(store: &mut MaterialsDataManager, events: Vec<MaterialsEvent>) {
    for event in events {
        store.bus.total_published += 1;
        deliver_one(store, &event);
    }
}

fn deliver_one(store: &mut MaterialsDataManager, event: &MaterialsEvent) {
    tracing::trace!(?event, "delivering materials event");
    // Subscriptions registered during delivery start with the next event.
    let ids: Vec<SubscriptionId> = store.bus.subscriptions.iter().map(|s| s.id).collect();
    for id in ids {
        let Some(subscription) = store.bus.find_mut(id) else {
            continue;
        };
        if !subscription.filter.accepts(event) {
            continue;
        }
        let Some(mut handler) = subscription.handler.take() else {
            store.bus.held.push((id, event.clone()));
            continue;
        };
        handler(store, event);
        while let Some(held) = store.bus.take_held(id) {
            handler(store, &held);
        }
        if let Some(subscription) = store.bus.find_mut(id) {
            subscription.handler = Some(handler);
        }
    }
}
