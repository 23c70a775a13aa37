use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use ed25519_dalek::VerifyingKey;
use epoch_bft::{
    networking::{messages::Message, network::Network},
    types::{validators::ValidatorSet, vertex::LedgerHeader},
};

/// Something sent to a replica by a peer.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Delivery {
    Message(Message),
    LedgerStatus(LedgerHeader),
}

/// A mock network stub which passes messages between replicas using channels.
///
/// Messages to peers that are not part of the mock network are dropped. A broadcast reaches every peer,
/// including the sender.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, Delivery)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Delivery)>>>,
    validator_set_updates: Arc<Mutex<Vec<ValidatorSet>>>,
}

impl NetworkStub {
    /// Take every delivery that is currently waiting in this replica's inbox.
    pub(crate) fn drain(&self) -> Vec<(VerifyingKey, Delivery)> {
        let inbox = self.inbox.lock().unwrap();
        let mut deliveries = Vec::new();
        loop {
            match inbox.try_recv() {
                Ok(delivery) => deliveries.push(delivery),
                Err(TryRecvError::Empty) => return deliveries,
                Err(TryRecvError::Disconnected) => panic!(),
            }
        }
    }

    pub(crate) fn validator_set_updates(&self) -> Vec<ValidatorSet> {
        self.validator_set_updates.lock().unwrap().clone()
    }

    fn deliver(&self, peer: &VerifyingKey, delivery: Delivery) {
        if let Some(peer) = self.all_peers.get(peer) {
            let _ = peer.send((self.my_verifying_key, delivery));
        }
    }
}

impl Network for NetworkStub {
    fn update_validator_set(&mut self, validator_set: ValidatorSet) {
        self.validator_set_updates.lock().unwrap().push(validator_set);
    }

    fn broadcast(&mut self, message: Message) {
        for peer in self.all_peers.keys() {
            self.deliver(peer, Delivery::Message(message.clone()));
        }
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        self.deliver(&peer, Delivery::Message(message));
    }

    fn send_ledger_status_update(&mut self, peer: VerifyingKey, header: LedgerHeader) {
        self.deliver(&peer, Delivery::LedgerStatus(header));
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, Delivery)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            validator_set_updates: Arc::new(Mutex::new(Vec::new())),
        })
        .collect()
}
