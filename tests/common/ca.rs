//! Throwaway P-256 CA used by the unit tests and the end-to-end flow.

use anyhow::Result;
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{
        X509, X509NameBuilder, X509Req,
        extension::{BasicConstraints, KeyUsage},
    },
};

pub struct TestCa {
    key: PKey<Private>,
    pub cert: X509,
}

impl TestCa {
    pub fn new(common_name: &str) -> Result<Self> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
        let name = name.build();

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial_number = serial()?.to_asn1_integer()?;
        builder.set_serial_number(&serial_number)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(1)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok(Self {
            key,
            cert: builder.build(),
        })
    }

    /// Issue a one-day leaf for `csr`, copying its requested extensions.
    pub fn issue(&self, csr: &X509Req) -> Result<X509> {
        let public = csr.public_key()?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial_number = serial()?.to_asn1_integer()?;
        builder.set_serial_number(&serial_number)?;
        builder.set_subject_name(csr.subject_name())?;
        builder.set_issuer_name(self.cert.subject_name())?;
        builder.set_pubkey(&public)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(1)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        for extension in csr.extensions()? {
            builder.append_extension(extension)?;
        }
        builder.sign(&self.key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    pub fn cert_pem(&self) -> Result<String> {
        Ok(String::from_utf8(self.cert.to_pem()?)?)
    }
}

fn serial() -> Result<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(127, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}
