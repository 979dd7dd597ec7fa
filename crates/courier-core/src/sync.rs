use courier_api::types::{Envelope, CONTENT_PLACEHOLDER};

/// Same `id`, or both sides carry a usable delivery token and they match.
pub fn same_message(a: &Envelope, b: &Envelope) -> bool {
    if a.id == b.id {
        return true;
    }
    matches!(
        (a.usable_token(), b.usable_token()),
        (Some(x), Some(y)) if x == y
    )
}

// Weakest to strongest content form; a decrypted local copy has an
// empty nonce.
fn content_class(envelope: &Envelope) -> u8 {
    if envelope.content.is_empty() || envelope.content == CONTENT_PLACEHOLDER {
        return 0;
    }
    let looks_hex = envelope.content.len() % 2 == 0
        && envelope.content.bytes().all(|b| b.is_ascii_hexdigit());
    if looks_hex && !envelope.nonce.is_empty() {
        return 1;
    }
    2
}

fn resolve(a: Envelope, b: Envelope) -> Envelope {
    let a_key = (a.delivery_status.rank(), content_class(&a));
    let b_key = (b.delivery_status.rank(), content_class(&b));
    let (mut winner, loser) = if b_key > a_key { (b, a) } else { (a, b) };
    for ack in loser.acks {
        if !winner.has_ack_from(&ack.peer_id) {
            winner.acks.push(ack);
        }
    }
    if winner.delivery_token.is_none() {
        winner.delivery_token = loser.delivery_token;
    }
    if winner.cold_reference.is_none() {
        winner.cold_reference = loser.cold_reference;
    }
    if winner.chain_ref.is_none() {
        winner.chain_ref = loser.chain_ref;
    }
    winner
}

/// Deduplicated view across sources, stably sorted by ascending timestamp.
/// Merging the output with itself changes nothing.
pub fn merge(sources: Vec<Vec<Envelope>>) -> Vec<Envelope> {
    let mut out: Vec<Envelope> = Vec::new();
    for envelope in sources.into_iter().flatten() {
        match out.iter().position(|seen| same_message(seen, &envelope)) {
            Some(index) => {
                let seen = out[index].clone();
                out[index] = resolve(seen, envelope);
            }
            None => out.push(envelope),
        }
    }
    out.sort_by_key(|e| e.timestamp);
    out
}

pub fn merge_thread(thread_id: &str, sources: Vec<Vec<Envelope>>) -> Vec<Envelope> {
    let sources = sources
        .into_iter()
        .map(|s| {
            s.into_iter()
                .filter(|e| e.thread_id == thread_id)
                .collect()
        })
        .collect();
    merge(sources)
}
