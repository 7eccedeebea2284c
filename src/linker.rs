//! UTXO linker: joins staged inputs to the outputs they spend on
//! (output txid, output vout).

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{IndexError, Result};
use crate::model::{
    Amount, Link, LinkedInput, LinkedOutput, OutPoint, StagedInput, StagedOutput,
};
use crate::store::UnitOfWork;

/// Produces the full outer join of `inputs` and `outputs`.
///
/// Inputs with no spend reference (coinbase) or whose referenced output is
/// not staged get a link with no output side. Outputs nobody spends get a
/// link with no input side. Two inputs referencing the same outpoint is a
/// double spend and fails the whole pass.
pub fn link(inputs: &[StagedInput], outputs: &[StagedOutput]) -> Result<Vec<Link>> {
    let mut unspent: BTreeMap<OutPoint, LinkedOutput> = BTreeMap::new();
    for output in outputs {
        let descriptor = output.descriptor()?;
        unspent.insert(
            output.outpoint(),
            LinkedOutput {
                block_height: output.block_height,
                txid: output.txid.clone(),
                vout: output.vout,
                value: Amount::from_sat(descriptor.value),
                addresses: descriptor.addresses,
            },
        );
    }

    let mut claims: HashMap<&OutPoint, &StagedInput> = HashMap::with_capacity(inputs.len());
    let mut links = Vec::with_capacity(inputs.len() + unspent.len());

    for input in inputs {
        let linked_input = LinkedInput {
            block_height: input.block_height,
            txid: input.txid.clone(),
            vin: input.vin,
        };
        let Some(spends) = &input.spends else {
            links.push(Link {
                input: Some(linked_input),
                output: None,
            });
            continue;
        };

        if let Some(first) = claims.insert(spends, input) {
            return Err(IndexError::DuplicateSpend {
                outpoint: spends.to_string(),
                first: format!("{}:{}", hex::encode(&first.txid), first.vin),
                second: format!("{}:{}", hex::encode(&input.txid), input.vin),
            });
        }

        links.push(Link {
            input: Some(linked_input),
            output: unspent.remove(spends),
        });
    }

    links.extend(unspent.into_values().map(|output| Link {
        input: None,
        output: Some(output),
    }));
    Ok(links)
}

/// Recomputes the stored link relation from everything currently staged.
pub fn relink(uow: &mut dyn UnitOfWork) -> Result<usize> {
    let inputs = uow.staged_inputs()?;
    let outputs = uow.staged_outputs()?;
    let links = link(&inputs, &outputs)?;
    debug!(
        "Linked {} inputs against {} outputs into {} link rows",
        inputs.len(),
        outputs.len(),
        links.len()
    );
    uow.replace_links(&links)?;
    Ok(links.len())
}
