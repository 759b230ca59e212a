use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, OrderConfirmedEvent, TransactionFailedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_confirmed_producer: Vec<EventProducer<OrderConfirmedEvent>>,
    pub transaction_failed_producer: Vec<EventProducer<TransactionFailedEvent>>,
}

impl EventProducers {
    pub async fn publish_order_confirmed(&self, event: OrderConfirmedEvent) {
        for emitter in &self.order_confirmed_producer {
            emitter.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_transaction_failed(&self, event: TransactionFailedEvent) {
        for emitter in &self.transaction_failed_producer {
            emitter.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_order_confirmed: Option<EventHandler<OrderConfirmedEvent>>,
    pub on_transaction_failed: Option<EventHandler<TransactionFailedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_confirmed = hooks.on_order_confirmed.map(|f| EventHandler::new(buffer_size, f));
        let on_transaction_failed = hooks.on_transaction_failed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_confirmed, on_transaction_failed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_confirmed {
            result.order_confirmed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_transaction_failed {
            result.transaction_failed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_confirmed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_transaction_failed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_confirmed: Option<Handler<OrderConfirmedEvent>>,
    pub on_transaction_failed: Option<Handler<TransactionFailedEvent>>,
}

impl EventHooks {
    pub fn on_order_confirmed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderConfirmedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_confirmed = Some(Arc::new(f));
        self
    }

    pub fn on_transaction_failed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TransactionFailedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_transaction_failed = Some(Arc::new(f));
        self
    }
}
