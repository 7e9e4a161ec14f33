use log::info;
use plonky2::{
    field::extension::Extendable,
    hash::hash_types::RichField,
    iop::witness::PartialWitness,
    plonk::{
        circuit_builder::CircuitBuilder,
        circuit_data::{CircuitConfig, CircuitData, VerifierCircuitData},
        config::GenericConfig,
        proof::ProofWithPublicInputs,
    },
};
use std::{fmt::Debug, time::Instant};

/// A circuit under test: its shape is fixed by `build`, each instance only
/// provides the witness.
pub trait UserCircuit<F, const D: usize>: Clone
where
    F: RichField + Extendable<D>,
{
    /// Wires to assign when proving an instance.
    type Wires;

    /// Called once to build the circuit shape.
    fn build(c: &mut CircuitBuilder<F, D>) -> Self::Wires;

    /// Assigns the instance to the wires returned by `build`.
    fn prove(&self, pw: &mut PartialWitness<F>, wires: &Self::Wires);
}

pub type Setup<F, C, const D: usize, W> = (W, CircuitData<F, C, D>, VerifierCircuitData<F, C, D>);

/// Builds the circuit of `U`.
pub fn setup_circuit<
    F: RichField + Extendable<D>,
    const D: usize,
    C: GenericConfig<D, F = F>,
    U: UserCircuit<F, D> + Debug,
>() -> Setup<F, C, D, U::Wires> {
    let mut b = CircuitBuilder::new(CircuitConfig::standard_recursion_config());
    let now = Instant::now();
    let wires = U::build(&mut b);
    let gates = b.num_gates();
    let circuit_data = b.build::<C>();
    let vcd = VerifierCircuitData {
        verifier_only: circuit_data.verifier_only.clone(),
        common: circuit_data.common.clone(),
    };
    info!(
        "[+] Circuit of {} gates built in {}ms",
        gates,
        now.elapsed().as_millis()
    );

    (wires, circuit_data, vcd)
}

/// Proves and verifies an instance with a circuit built by [`setup_circuit`].
/// Panics if the witness doesn't satisfy the circuit.
pub fn prove_circuit<
    F: RichField + Extendable<D>,
    const D: usize,
    C: GenericConfig<D, F = F>,
    U: UserCircuit<F, D> + Debug,
>(
    setup: &Setup<F, C, D, U::Wires>,
    u: &U,
) -> ProofWithPublicInputs<F, C, D> {
    let mut pw = PartialWitness::new();
    let now = Instant::now();
    u.prove(&mut pw, &setup.0);
    let proof = setup.1.prove(pw).expect("invalid proof");
    info!("[+] Proof generated in {}ms", now.elapsed().as_millis());
    setup
        .2
        .verify(proof.clone())
        .expect("failed to verify proof");

    proof
}

/// Builds the circuit then proves and verifies the instance.
pub fn run_circuit<
    F: RichField + Extendable<D>,
    const D: usize,
    C: GenericConfig<D, F = F>,
    U: UserCircuit<F, D> + Debug,
>(
    u: U,
) -> ProofWithPublicInputs<F, C, D> {
    let setup = setup_circuit::<F, D, C, U>();

    prove_circuit(&setup, &u)
}
